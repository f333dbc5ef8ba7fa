//! Ripple Core
//!
//! The reactive data layer behind a Ripple view instance:
//!
//! - **Keypaths**: normalized addresses into a JSON-like data tree
//! - **Viewmodel**: cached reads and batched writes through keypaths
//! - **Dependency graph**: keypath → subscribers, with pattern keypaths
//! - **Computations**: lazily evaluated derived values with tracked dependencies
//! - **Runloop**: nested `start`/`end` brackets that flush once
//! - **Array adapter**: index maps for structural array mutations
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{ArrayMethod, Computed, Viewmodel};
//! use serde_json::json;
//!
//! let mut vm = Viewmodel::new(json!({ "items": [1, 2, 3] }));
//!
//! vm.compute("count", Computed::new(|vm| {
//!     vm.get("items.length").unwrap_or(json!(0))
//! })).unwrap();
//! assert_eq!(vm.get("count"), Some(json!(3)));
//!
//! let (length, done) = vm
//!     .mutate_array("items", ArrayMethod::Push(vec![json!(4)]))
//!     .unwrap();
//! assert_eq!(length, json!(4));
//! assert!(done.is_complete());
//! assert_eq!(vm.get("count"), Some(json!(4)));
//! ```

pub mod array;
pub mod computation;
pub mod data;
pub mod error;
pub mod graph;
pub mod keypath;
pub mod runloop;
pub mod viewmodel;

pub use array::{new_indices, ArrayMethod, NewIndices};
pub use data::MAX_INDEX_GAP;
pub use computation::{ComputationId, Computed, Getter, Setter};
pub use error::{CoreError, Result};
pub use graph::{Dependant, DependantId, DependantKind, DependencyGraph, FnDependant, SubscriberId};
pub use keypath::{IntoKeypath, Keypath, LENGTH, WILDCARD};
pub use runloop::Completion;
pub use viewmodel::{Context, Viewmodel, ViewmodelStats};

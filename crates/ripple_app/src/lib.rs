//! Ripple View Instances
//!
//! Initialization and the public data API of a view instance, built on the
//! reactive layer in [`ripple_core`]. Parsing, rendering and the host
//! environment are collaborators supplied by the caller.
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use ripple_app::prelude::*;
//! use serde_json::json;
//!
//! struct Headless;
//!
//! impl Host for Headless {
//!     fn find_target(&self, _selector: &str) -> Option<MountTarget> {
//!         None
//!     }
//! }
//!
//! struct NoopRenderer;
//!
//! impl Renderer for NoopRenderer {
//!     fn render(&self, _request: RenderRequest<'_>, on_complete: Completion) -> anyhow::Result<()> {
//!         on_complete.fulfil();
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let instance = Instance::initialise(
//!         InstanceOptions::new().with_data(json!({ "items": [1, 2, 3] })),
//!         &InstanceOptions::defaults(),
//!         Collaborators {
//!             host: Rc::new(Headless),
//!             parser: None,
//!             renderer: Rc::new(NoopRenderer),
//!         },
//!     )?;
//!
//!     let mut instance = instance.borrow_mut();
//!     assert!(instance.completion().is_complete());
//!     instance.push("items", vec![json!(4)])?;
//!     assert_eq!(instance.get("items.length"), Some(json!(4)));
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
pub mod instance;
pub mod registry;
pub mod render;
pub mod template;

pub use config::{Adapt, CompleteCallback, InstanceFlags, InstanceOptions, ParseOptions};
pub use error::{InstanceError, Result};
pub use instance::{ChildQueue, Collaborators, Component, Instance, InstanceRef, PendingChild};
pub use registry::{DataOption, Registry, RegistryOption, REGISTRIES};
pub use render::{Animation, Host, MountTarget, RenderRequest, Renderer};
pub use template::{Parsed, Parser, ResolvedTemplate, TemplateOption, TemplateSource};

// Re-export the reactive layer for convenience
pub use ripple_core::{ArrayMethod, Completion, Computed, CoreError, DependantKind, Keypath, Viewmodel};

/// Prelude module - import everything commonly needed
pub mod prelude {
    pub use crate::config::{Adapt, InstanceOptions};
    pub use crate::error::{InstanceError, Result};
    pub use crate::instance::{Collaborators, Component, Instance, InstanceRef};
    pub use crate::render::{Host, MountTarget, RenderRequest, Renderer};
    pub use crate::template::{Parsed, Parser};

    pub use ripple_core::{Completion, Computed, DependantKind, Keypath};
}

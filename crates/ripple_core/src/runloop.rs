//! Batching runloop
//!
//! Mutations are bracketed by `start`/`end`. Brackets nest; every nested
//! bracket contributes to the same cycle and only the outermost `end` hands the
//! cycle back for flushing. The [`Completion`] returned by `start` is fulfilled
//! once that flush has run.
//!
//! ```rust
//! use ripple_core::Viewmodel;
//! use serde_json::json;
//!
//! let mut vm = Viewmodel::new(json!({ "a": 1, "b": 2 }));
//!
//! let done = vm.start(false);
//! vm.set("a", json!(10)).unwrap();
//! vm.start(false);
//! vm.set("b", json!(20)).unwrap();
//! vm.end().unwrap(); // inner end: nothing flushes yet
//! assert!(!done.is_complete());
//! vm.end().unwrap();
//! assert!(done.is_complete());
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll, Waker};

use indexmap::{IndexMap, IndexSet};

use crate::computation::ComputationId;
use crate::error::{CoreError, Result};
use crate::graph::DependantId;
use crate::keypath::Keypath;

// =============================================================================
// COMPLETION
// =============================================================================

#[derive(Default)]
struct CompletionState {
    fulfilled: bool,
    callbacks: Vec<Box<dyn FnOnce()>>,
    wakers: Vec<Waker>,
}

/// A completion signal, fulfilled at most once
///
/// Callbacks attached after fulfilment run immediately. The handle can also be
/// awaited.
#[derive(Clone, Default)]
pub struct Completion {
    state: Rc<RefCell<CompletionState>>,
}

impl Completion {
    /// A signal that has not been fulfilled yet
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that is already fulfilled
    pub fn fulfilled() -> Self {
        let completion = Self::new();
        completion.fulfil();
        completion
    }

    pub fn is_complete(&self) -> bool {
        self.state.borrow().fulfilled
    }

    /// Run `callback` once the signal is fulfilled (immediately if it already is)
    pub fn on_complete(&self, callback: impl FnOnce() + 'static) {
        if self.is_complete() {
            callback();
        } else {
            self.state.borrow_mut().callbacks.push(Box::new(callback));
        }
    }

    /// Fulfil the signal; later calls are no-ops
    pub fn fulfil(&self) {
        let (callbacks, wakers) = {
            let mut state = self.state.borrow_mut();
            if state.fulfilled {
                return;
            }
            state.fulfilled = true;
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };

        for callback in callbacks {
            callback();
        }
        for waker in wakers {
            waker.wake();
        }
    }

    /// A signal fulfilled once both `self` and `other` are
    pub fn join(&self, other: &Completion) -> Completion {
        let joined = Completion::new();
        let inner = joined.clone();
        let other = other.clone();
        self.on_complete(move || other.on_complete(move || inner.fulfil()));
        joined
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<()> {
        let mut state = self.state.borrow_mut();
        if state.fulfilled {
            Poll::Ready(())
        } else {
            state.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("fulfilled", &self.is_complete())
            .finish()
    }
}

// =============================================================================
// CYCLE
// =============================================================================

/// How far an invalidation reaches when notifying dependants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reach {
    /// The keypath, its ancestors and its descendants
    Deep,
    /// The keypath and its ancestors only
    Shallow,
}

/// The accumulator for one batch of mutations
pub(crate) struct Cycle {
    /// Invalidated keypaths in invalidation order
    pub dirty: IndexMap<Keypath, Reach>,
    /// Computations dirtied during the cycle, in dirtying order
    pub computations: IndexSet<ComputationId>,
    /// Dependants to notify regardless of keypath
    pub dependants: IndexSet<DependantId>,
    /// Observers are notified after bindings and renders
    pub defer: bool,
    pub completion: Completion,
}

impl Cycle {
    fn new(defer: bool) -> Self {
        Self {
            dirty: IndexMap::new(),
            computations: IndexSet::new(),
            dependants: IndexSet::new(),
            defer,
            completion: Completion::new(),
        }
    }

    /// Record an invalidation; a deep reach wins over a shallow one
    pub fn mark(&mut self, keypath: Keypath, reach: Reach) {
        let entry = self.dirty.entry(keypath).or_insert(reach);
        if reach == Reach::Deep {
            *entry = Reach::Deep;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && self.computations.is_empty() && self.dependants.is_empty()
    }
}

// =============================================================================
// RUNLOOP
// =============================================================================

/// Tracks bracket depth and the open cycle
#[derive(Default)]
pub(crate) struct Runloop {
    depth: u32,
    cycle: Option<Cycle>,
}

impl Runloop {
    /// Open a bracket, creating the cycle if this is the outermost one
    pub fn start(&mut self, defer: bool) -> Completion {
        self.depth += 1;
        self.cycle
            .get_or_insert_with(|| Cycle::new(defer))
            .completion
            .clone()
    }

    /// Close a bracket; the outermost close yields the cycle to flush
    pub fn end(&mut self) -> Result<Option<Cycle>> {
        match self.depth {
            0 => Err(CoreError::UnbalancedEnd),
            1 => {
                self.depth = 0;
                Ok(self.cycle.take())
            }
            _ => {
                self.depth -= 1;
                Ok(None)
            }
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_open(&self) -> bool {
        self.depth > 0
    }

    pub fn cycle_mut(&mut self) -> Option<&mut Cycle> {
        self.cycle.as_mut()
    }
}

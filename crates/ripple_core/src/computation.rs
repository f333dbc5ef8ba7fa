//! Computed properties
//!
//! A computation is a named derived value. Its getter runs lazily on the first
//! read (or the first read after it was dirtied) inside a tracking scope: every
//! keypath read through the viewmodel while the getter runs becomes one of its
//! dependencies, and the dependency graph is updated to match the new set.
//!
//! A computation is dirtied as soon as one of its dependencies is invalidated,
//! and re-evaluated once during the flush of that cycle, after all of the
//! cycle's writes have landed.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use serde_json::Value;
use slotmap::{new_key_type, SlotMap};

use crate::error::{CoreError, Result};
use crate::graph::SubscriberId;
use crate::keypath::Keypath;
use crate::runloop::Reach;
use crate::viewmodel::Viewmodel;

new_key_type! {
    /// Unique identifier for a computation
    pub struct ComputationId;
}

/// Computation getter
pub type Getter = Rc<dyn Fn(&mut Viewmodel) -> Value>;

/// Computation setter; responsible for writing whatever keypaths it chooses
pub type Setter = Rc<dyn Fn(&mut Viewmodel, Value) -> Result<()>>;

/// Definition of a computed property
#[derive(Clone)]
pub struct Computed {
    getter: Getter,
    setter: Option<Setter>,
}

impl Computed {
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn(&mut Viewmodel) -> Value + 'static,
    {
        Self {
            getter: Rc::new(getter),
            setter: None,
        }
    }

    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&mut Viewmodel, Value) -> Result<()> + 'static,
    {
        self.setter = Some(Rc::new(setter));
        self
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// Internal computation node
pub(crate) struct Computation {
    pub keypath: Keypath,
    pub getter: Getter,
    pub setter: Option<Setter>,
    /// Cached value, only valid while not dirty
    pub value: Option<Value>,
    pub dirty: bool,
    /// Keypaths read by the last evaluation
    pub dependencies: IndexSet<Keypath>,
    pub evaluations: u64,
}

/// Computations by name
#[derive(Default)]
pub(crate) struct ComputationRegistry {
    nodes: SlotMap<ComputationId, Computation>,
}

impl ComputationRegistry {
    pub fn id_of(&self, keypath: &Keypath) -> Option<ComputationId> {
        self.nodes
            .iter()
            .find(|(_, node)| &node.keypath == keypath)
            .map(|(id, _)| id)
    }

    /// The computation whose keypath is `keypath` or one of its ancestors
    pub fn owning(&self, keypath: &Keypath) -> Option<(ComputationId, &Keypath)> {
        self.nodes
            .iter()
            .find(|(_, node)| keypath.is_within(&node.keypath))
            .map(|(id, node)| (id, &node.keypath))
    }

    pub fn get(&self, id: ComputationId) -> Option<&Computation> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: ComputationId) -> Option<&mut Computation> {
        self.nodes.get_mut(id)
    }

    pub fn insert(&mut self, keypath: Keypath, definition: Computed) -> ComputationId {
        self.nodes.insert(Computation {
            keypath,
            getter: definition.getter,
            setter: definition.setter,
            value: None,
            dirty: true,
            dependencies: IndexSet::new(),
            evaluations: 0,
        })
    }

    pub fn remove(&mut self, id: ComputationId) -> Option<Computation> {
        self.nodes.remove(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl Viewmodel {
    /// Register a computed property under `name`
    ///
    /// Nothing is evaluated until the first read. Registering a name twice
    /// replaces the earlier definition.
    pub fn compute(&mut self, name: &str, definition: Computed) -> Result<ComputationId> {
        let keypath = Keypath::parse(name)?;
        if let Some(previous) = self.computations.id_of(&keypath) {
            self.remove_computation(previous);
        }
        tracing::trace!("registered computation {}", keypath);
        Ok(self.computations.insert(keypath, definition))
    }

    /// Remove a computation and all of its registrations
    pub fn remove_computation(&mut self, id: ComputationId) {
        if let Some(node) = self.computations.remove(id) {
            for dep in &node.dependencies {
                self.graph.unregister(dep, SubscriberId::Computation(id));
            }
        }
    }

    /// How many times the named computation's getter has run
    pub fn evaluations(&self, name: &str) -> Option<u64> {
        let keypath = Keypath::parse(name).ok()?;
        let id = self.computations.id_of(&keypath)?;
        self.computations.get(id).map(|node| node.evaluations)
    }

    /// The current value of a computation, evaluating it if dirty
    pub(crate) fn computed_value(&mut self, id: ComputationId) -> Option<Value> {
        let node = self.computations.get(id)?;
        if !node.dirty {
            return node.value.clone();
        }
        if self.evaluating.contains(&id) {
            tracing::warn!(
                "computation {} depends on itself; serving last value",
                node.keypath
            );
            return node.value.clone();
        }
        Some(self.evaluate(id))
    }

    /// Run the getter in a fresh tracking scope and resync registrations
    pub(crate) fn evaluate(&mut self, id: ComputationId) -> Value {
        let Some(getter) = self.computations.get(id).map(|node| node.getter.clone()) else {
            return Value::Null;
        };

        self.evaluating.insert(id);
        self.tracking.push(IndexSet::new());
        let value = getter(self);
        let read = self.tracking.pop().unwrap_or_default();
        self.evaluating.swap_remove(&id);

        let Some(node) = self.computations.get_mut(id) else {
            return value;
        };
        let previous = std::mem::replace(&mut node.dependencies, read);
        node.value = Some(value.clone());
        node.dirty = false;
        node.evaluations += 1;
        tracing::trace!(
            "evaluated computation {} ({} dependencies)",
            node.keypath,
            node.dependencies.len()
        );

        let current = node.dependencies.clone();
        let sub = SubscriberId::Computation(id);
        for stale in previous.iter().filter(|kp| !current.contains(*kp)) {
            self.graph.unregister(stale, sub);
        }
        for fresh in current.iter().filter(|kp| !previous.contains(*kp)) {
            self.graph.register(fresh, sub);
        }

        value
    }

    /// Dirty a computation and everything downstream of it
    pub(crate) fn dirty_computation(&mut self, id: ComputationId) {
        let keypath = match self.computations.get_mut(id) {
            Some(node) if !node.dirty => {
                node.dirty = true;
                node.keypath.clone()
            }
            _ => return,
        };

        tracing::trace!("computation {} dirtied", keypath);
        if let Some(cycle) = self.runloop.cycle_mut() {
            cycle.computations.insert(id);
        }
        self.invalidate(&keypath, Reach::Deep);
    }

    /// Forward a write to a computation's setter
    pub(crate) fn write_computation(&mut self, id: ComputationId, value: Value) -> Result<()> {
        let Some(node) = self.computations.get(id) else {
            return Ok(());
        };
        match node.setter.clone() {
            Some(setter) => setter(self, value),
            None => Err(CoreError::ReadOnlyComputation(node.keypath.to_string())),
        }
    }
}

//! The keypath-addressed viewmodel
//!
//! All reads and writes of instance data go through the [`Viewmodel`], either
//! directly or through a transient [`Context`] bound to one keypath. The
//! viewmodel owns the data tree, the value cache, the dependency graph, the
//! computation registry, the registered dependants and the runloop.
//!
//! # Flush order
//!
//! When the outermost bracket closes:
//!
//! 1. computations dirtied during the cycle are re-evaluated once each,
//! 2. dependants registered on invalidated keypaths are collected
//!    breadth-first from the directly mutated keypaths, then dependants on
//!    pattern keypaths matching an invalidated keypath, one of its ancestors,
//!    or (for deep invalidations) lying below it,
//! 3. each dependant is notified exactly once, observers first, then
//!    two-way bindings, then render bindings (observers last in a deferred
//!    cycle).
//!
//! ```rust
//! use ripple_core::Viewmodel;
//! use serde_json::json;
//! use std::{cell::Cell, rc::Rc};
//!
//! let mut vm = Viewmodel::new(json!({ "user": { "name": "Ada" } }));
//! let calls = Rc::new(Cell::new(0));
//! let c = calls.clone();
//! vm.observe("user", move |_, _| c.set(c.get() + 1)).unwrap();
//!
//! vm.start(false);
//! vm.set("user.name", json!("Grace")).unwrap();
//! vm.set("user.age", json!(85)).unwrap();
//! vm.end().unwrap();
//!
//! assert_eq!(calls.get(), 1);
//! assert_eq!(vm.get("user.name"), Some(json!("Grace")));
//! ```

use std::collections::VecDeque;

use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use serde_json::Value;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::array::{self, ArrayMethod, NewIndices};
use crate::computation::{ComputationId, ComputationRegistry};
use crate::data;
use crate::error::{CoreError, Result};
use crate::graph::{
    Dependant, DependantId, DependantKind, DependencyGraph, FnDependant, SubscriberId,
};
use crate::keypath::{IntoKeypath, Keypath, LENGTH};
use crate::runloop::{Completion, Cycle, Reach, Runloop};

/// Storage for a registered dependant
struct DependantSlot {
    kind: DependantKind,
    /// Taken out while the dependant is being notified
    handler: Option<Box<dyn Dependant>>,
    /// Keypaths it is registered on
    keypaths: SmallVec<[Keypath; 2]>,
}

/// Per-instance data, caches, dependency state and runloop
pub struct Viewmodel {
    pub(crate) data: Value,
    pub(crate) cache: FxHashMap<Keypath, Option<Value>>,
    pub(crate) graph: DependencyGraph,
    pub(crate) computations: ComputationRegistry,
    dependants: SlotMap<DependantId, DependantSlot>,
    pub(crate) runloop: Runloop,
    /// Cycles closed while a flush was running
    pending: VecDeque<Cycle>,
    flushing: bool,
    /// Open dependency-tracking scopes, innermost last
    pub(crate) tracking: Vec<IndexSet<Keypath>>,
    pub(crate) evaluating: IndexSet<ComputationId>,
}

impl Viewmodel {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            cache: FxHashMap::default(),
            graph: DependencyGraph::new(),
            computations: ComputationRegistry::default(),
            dependants: SlotMap::with_key(),
            runloop: Runloop::default(),
            pending: VecDeque::new(),
            flushing: false,
            tracking: Vec::new(),
            evaluating: IndexSet::new(),
        }
    }

    /// The data root
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// A context bound to `keypath`
    pub fn context(&mut self, keypath: impl IntoKeypath) -> Result<Context<'_>> {
        Ok(Context {
            keypath: keypath.into_keypath()?,
            vm: self,
        })
    }

    /// Read a value; `None` when nothing exists there (or the keypath is malformed)
    pub fn get(&mut self, keypath: impl IntoKeypath) -> Option<Value> {
        let keypath = keypath.into_keypath().ok()?;
        self.read(&keypath)
    }

    /// Write a value inside the open cycle
    pub fn set(&mut self, keypath: impl IntoKeypath, value: Value) -> Result<()> {
        let keypath = keypath.into_keypath()?;
        self.write(&keypath, value)
    }

    /// Invalidate a keypath and its descendants without touching the data
    pub fn mark(&mut self, keypath: impl IntoKeypath) -> Result<()> {
        let keypath = keypath.into_keypath()?;
        self.mark_at(&keypath)
    }

    /// Whether a cached value is held for `keypath`
    pub fn is_cached(&self, keypath: &Keypath) -> bool {
        self.cache.contains_key(keypath)
    }

    // =========================================================================
    // RUNLOOP
    // =========================================================================

    /// Open a batching bracket
    ///
    /// Nested brackets join the open cycle; the returned completion resolves
    /// after the outermost `end` has flushed. With `defer`, observers are
    /// notified after bindings and renders (set by the outermost bracket).
    pub fn start(&mut self, defer: bool) -> Completion {
        self.runloop.start(defer)
    }

    /// Close a batching bracket, flushing if it was the outermost one
    pub fn end(&mut self) -> Result<()> {
        let Some(cycle) = self.runloop.end()? else {
            return Ok(());
        };
        if self.flushing {
            self.pending.push_back(cycle);
        } else {
            self.flush(cycle);
        }
        Ok(())
    }

    /// Run `f` inside its own bracket
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        self.start(false);
        let result = f(self);
        self.end()?;
        Ok(result)
    }

    pub fn is_batching(&self) -> bool {
        self.runloop.is_open()
    }

    /// Fail if a bracket was left open
    pub fn ensure_closed(&self) -> Result<()> {
        match self.runloop.depth() {
            0 => Ok(()),
            depth => Err(CoreError::CycleLeftOpen(depth)),
        }
    }

    // =========================================================================
    // DEPENDANTS
    // =========================================================================

    /// Store a dependant; it receives nothing until registered on a keypath
    pub fn add_dependant(&mut self, dependant: impl Dependant + 'static) -> DependantId {
        self.dependants.insert(DependantSlot {
            kind: dependant.kind(),
            handler: Some(Box::new(dependant)),
            keypaths: SmallVec::new(),
        })
    }

    /// Register a dependant on a keypath or pattern keypath
    ///
    /// Returns `false` when it was already registered there (or is unknown).
    pub fn register(&mut self, id: DependantId, keypath: impl IntoKeypath) -> Result<bool> {
        let keypath = keypath.into_keypath()?;
        let Some(slot) = self.dependants.get_mut(id) else {
            return Ok(false);
        };
        let added = self.graph.register(&keypath, SubscriberId::Dependant(id));
        if added {
            slot.keypaths.push(keypath);
        }
        Ok(added)
    }

    /// Unregister a dependant; a no-op if it was not registered there
    pub fn unregister(&mut self, id: DependantId, keypath: impl IntoKeypath) -> Result<bool> {
        let keypath = keypath.into_keypath()?;
        let removed = self.graph.unregister(&keypath, SubscriberId::Dependant(id));
        if let Some(slot) = self.dependants.get_mut(id) {
            slot.keypaths.retain(|k| *k != keypath);
        }
        Ok(removed)
    }

    /// Drop a dependant and all of its registrations
    pub fn remove_dependant(&mut self, id: DependantId) -> bool {
        let Some(slot) = self.dependants.remove(id) else {
            return false;
        };
        for keypath in &slot.keypaths {
            self.graph.unregister(keypath, SubscriberId::Dependant(id));
        }
        true
    }

    /// Register a closure on `keypath`
    pub fn subscribe<F>(
        &mut self,
        keypath: impl IntoKeypath,
        kind: DependantKind,
        callback: F,
    ) -> Result<DependantId>
    where
        F: FnMut(&mut Viewmodel, &Keypath) + 'static,
    {
        let keypath = keypath.into_keypath()?;
        let id = self.add_dependant(FnDependant::new(kind, callback));
        self.register(id, keypath)?;
        Ok(id)
    }

    /// Register an observer closure on `keypath`
    pub fn observe<F>(&mut self, keypath: impl IntoKeypath, callback: F) -> Result<DependantId>
    where
        F: FnMut(&mut Viewmodel, &Keypath) + 'static,
    {
        self.subscribe(keypath, DependantKind::Observer, callback)
    }

    // =========================================================================
    // ARRAYS
    // =========================================================================

    /// Apply an array method at `keypath` inside its own deferred bracket
    ///
    /// Structural methods shuffle existing dependants to follow their
    /// elements; `sort` and `reverse` mark the whole array instead. Returns
    /// the method's own return value and the bracket's completion.
    pub fn mutate_array(
        &mut self,
        keypath: impl IntoKeypath,
        method: ArrayMethod,
    ) -> Result<(Value, Completion)> {
        let keypath = keypath.into_keypath()?;
        if let Some((_, owner)) = self.computations.owning(&keypath) {
            return Err(CoreError::ReadOnlyComputation(owner.to_string()));
        }

        let len = match data::lookup_mut(&mut self.data, &keypath) {
            Some(Value::Array(items)) => items.len(),
            _ => {
                return Err(CoreError::NotAnArray {
                    keypath: keypath.to_string(),
                    method: method.name(),
                })
            }
        };

        let new_indices = array::new_indices(len, &method);
        let name = method.name();
        let completion = self.start(true);

        let result = match data::lookup_mut(&mut self.data, &keypath) {
            Some(Value::Array(items)) => method.apply(items),
            _ => Value::Null,
        };
        let outcome = match new_indices {
            Some(new_indices) => self.shuffle_at(&keypath, &new_indices),
            None => {
                tracing::debug!("{} on {} has no stable permutation; marking", name, keypath);
                self.mark_at(&keypath)
            }
        };

        self.end()?;
        outcome?;
        Ok((result, completion))
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    pub(crate) fn read(&mut self, keypath: &Keypath) -> Option<Value> {
        if let Some(scope) = self.tracking.last_mut() {
            scope.insert(keypath.clone());
        }

        if let Some((id, owner)) = self
            .computations
            .owning(keypath)
            .map(|(id, owner)| (id, owner.clone()))
        {
            let value = self.computed_value(id)?;
            let relative = keypath.relative_to(&owner)?;
            return data::lookup(&value, &relative);
        }

        if let Some(cached) = self.cache.get(keypath) {
            return cached.clone();
        }
        let value = data::lookup(&self.data, keypath);
        self.cache.insert(keypath.clone(), value.clone());
        value
    }

    pub(crate) fn write(&mut self, keypath: &Keypath, value: Value) -> Result<()> {
        if !self.runloop.is_open() {
            return Err(CoreError::NoActiveCycle(keypath.to_string()));
        }

        if let Some((id, owner)) = self
            .computations
            .owning(keypath)
            .map(|(id, owner)| (id, owner.clone()))
        {
            if owner == *keypath {
                return self.write_computation(id, value);
            }
            return Err(CoreError::ReadOnlyComputation(owner.to_string()));
        }

        // unchanged primitives are not a mutation
        let unchanged = matches!(
            data::lookup_mut(&mut self.data, keypath),
            Some(current) if !current.is_object() && !current.is_array() && *current == value
        );
        if unchanged {
            return Ok(());
        }

        data::assign(&mut self.data, keypath, value)?;
        self.invalidate(keypath, Reach::Deep);
        Ok(())
    }

    pub(crate) fn mark_at(&mut self, keypath: &Keypath) -> Result<()> {
        if !self.runloop.is_open() {
            return Err(CoreError::NoActiveCycle(keypath.to_string()));
        }
        self.invalidate(keypath, Reach::Deep);
        Ok(())
    }

    pub(crate) fn shuffle_at(&mut self, keypath: &Keypath, new_indices: &NewIndices) -> Result<()> {
        if !self.runloop.is_open() {
            return Err(CoreError::NoActiveCycle(keypath.to_string()));
        }
        let new_len = match data::lookup_mut(&mut self.data, keypath) {
            Some(Value::Array(items)) => items.len(),
            _ => {
                return Err(CoreError::NotAnArray {
                    keypath: keypath.to_string(),
                    method: "shuffle",
                })
            }
        };

        // registrations past the old end now address elements
        let old_len = new_indices.len();
        let mut grown: Vec<usize> = self
            .graph
            .keypaths_at_indices(keypath, |i| i >= old_len && i < new_len)
            .iter()
            .filter_map(|k| k.index_under(keypath).map(|(i, _)| i))
            .collect();
        grown.sort_unstable();
        grown.dedup();

        let rekeyed = self.graph.rekey(keypath, new_indices);
        for (id, from, to) in &rekeyed.moved {
            let Some(slot) = self.dependants.get_mut(*id) else {
                continue;
            };
            slot.keypaths.retain(|k| k != from);
            if !slot.keypaths.contains(to) {
                slot.keypaths.push(to.clone());
            }
            if let Some(handler) = slot.handler.as_mut() {
                handler.rebind(from, to);
            }
        }
        tracing::trace!(
            "shuffled {}: {} moved, {} removed",
            keypath,
            rekeyed.moved.len(),
            rekeyed.removed.len()
        );

        // positions still holding the element they held before
        let mut stable = vec![false; new_len];
        for (old, new) in new_indices.iter().enumerate() {
            if *new == Some(old) && old < new_len {
                stable[old] = true;
            }
        }
        let changed: Vec<ComputationId> = self
            .graph
            .keypaths_at_indices(keypath, |i| i >= new_len || !stable[i])
            .iter()
            .flat_map(|k| self.graph.subscribers(k).iter())
            .filter_map(|sub| match sub {
                SubscriberId::Computation(id) => Some(*id),
                SubscriberId::Dependant(_) => None,
            })
            .collect();

        self.invalidate(keypath, Reach::Shallow);
        self.invalidate(&keypath.join(LENGTH), Reach::Deep);
        for index in grown {
            self.invalidate(&keypath.join(index), Reach::Deep);
        }
        if let Some(cycle) = self.runloop.cycle_mut() {
            cycle.dependants.extend(rekeyed.removed);
        }
        for id in changed {
            self.dirty_computation(id);
        }
        Ok(())
    }

    /// Drop cached values for the keypath, its ancestors and descendants
    fn clear_cache(&mut self, keypath: &Keypath) {
        self.cache
            .retain(|k, _| !(k.is_within(keypath) || keypath.is_descendant_of(k)));
    }

    /// Clear caches, record the keypath in the open cycle and dirty the
    /// computations reading it
    pub(crate) fn invalidate(&mut self, keypath: &Keypath, reach: Reach) {
        tracing::trace!("invalidate {} ({:?})", keypath, reach);
        self.clear_cache(keypath);
        if let Some(cycle) = self.runloop.cycle_mut() {
            cycle.mark(keypath.clone(), reach);
        }

        let computations: Vec<ComputationId> = self
            .graph
            .affected(keypath, reach == Reach::Deep)
            .iter()
            .flat_map(|k| self.graph.subscribers(k).iter())
            .filter_map(|sub| match sub {
                SubscriberId::Computation(id) => Some(*id),
                SubscriberId::Dependant(_) => None,
            })
            .collect();
        for id in computations {
            self.dirty_computation(id);
        }
    }

    fn flush(&mut self, cycle: Cycle) {
        self.flushing = true;
        let mut queue = VecDeque::from([cycle]);
        let mut completions = Vec::new();

        while let Some(cycle) = queue.pop_front() {
            self.flush_cycle(&cycle);
            completions.push(cycle.completion);
            queue.extend(self.pending.drain(..));
        }

        self.flushing = false;
        for completion in completions {
            completion.fulfil();
        }
    }

    fn flush_cycle(&mut self, cycle: &Cycle) {
        if cycle.is_empty() {
            return;
        }

        let mut evaluated = 0;
        for &id in &cycle.computations {
            if self.computations.get(id).is_some_and(|node| node.dirty) {
                self.evaluate(id);
                evaluated += 1;
            }
        }

        // breadth-first from mutated keypaths, then pattern matches
        let mut candidates: Vec<(DependantId, Keypath)> = Vec::new();
        for (keypath, reach) in &cycle.dirty {
            for registered in self.graph.affected(keypath, *reach == Reach::Deep) {
                for sub in self.graph.subscribers(&registered) {
                    if let SubscriberId::Dependant(id) = sub {
                        candidates.push((*id, registered.clone()));
                    }
                }
            }
        }
        for (keypath, reach) in &cycle.dirty {
            for (sub, matched) in self.graph.affected_patterns(keypath, *reach == Reach::Deep) {
                if let SubscriberId::Dependant(id) = sub {
                    candidates.push((id, matched));
                }
            }
        }
        for &id in &cycle.dependants {
            let keypath = self
                .dependants
                .get(id)
                .and_then(|slot| slot.keypaths.first().cloned())
                .unwrap_or_else(Keypath::root);
            candidates.push((id, keypath));
        }

        let mut seen = IndexSet::new();
        let mut ordered: Vec<(u8, DependantId, Keypath)> = Vec::new();
        for (id, keypath) in candidates {
            let Some(slot) = self.dependants.get(id) else {
                continue;
            };
            if seen.insert(id) {
                ordered.push((phase(slot.kind, cycle.defer), id, keypath));
            }
        }
        ordered.sort_by_key(|(phase, _, _)| *phase);

        tracing::debug!(
            "flushing cycle: {} keypaths, {} computations re-evaluated, {} dependants",
            cycle.dirty.len(),
            evaluated,
            ordered.len()
        );

        for (_, id, keypath) in ordered {
            self.notify(id, &keypath);
        }
    }

    fn notify(&mut self, id: DependantId, keypath: &Keypath) {
        let Some(mut handler) = self.dependants.get_mut(id).and_then(|s| s.handler.take()) else {
            return;
        };
        handler.update(self, keypath);
        if let Some(slot) = self.dependants.get_mut(id) {
            slot.handler = Some(handler);
        }
    }

    /// Statistics about the viewmodel
    pub fn stats(&self) -> ViewmodelStats {
        ViewmodelStats {
            keypaths_with_subscribers: self.graph.keypath_count(),
            pattern_subscribers: self.graph.pattern_count(),
            dependants: self.dependants.len(),
            computations: self.computations.len(),
            cached_values: self.cache.len(),
            batch_depth: self.runloop.depth(),
        }
    }
}

fn phase(kind: DependantKind, defer: bool) -> u8 {
    match kind {
        DependantKind::Observer if defer => 3,
        DependantKind::Observer => 0,
        DependantKind::Binding => 1,
        DependantKind::Render => 2,
    }
}

impl Default for Viewmodel {
    fn default() -> Self {
        Self::new(Value::Object(Default::default()))
    }
}

impl Drop for Viewmodel {
    fn drop(&mut self) {
        if self.runloop.is_open() {
            tracing::warn!(
                "viewmodel dropped with a runloop cycle open (depth {}); pending changes were never flushed",
                self.runloop.depth()
            );
        }
    }
}

/// Statistics about a viewmodel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewmodelStats {
    pub keypaths_with_subscribers: usize,
    pub pattern_subscribers: usize,
    pub dependants: usize,
    pub computations: usize,
    pub cached_values: usize,
    pub batch_depth: u32,
}

// =============================================================================
// CONTEXT
// =============================================================================

/// A viewmodel handle bound to one keypath
pub struct Context<'a> {
    vm: &'a mut Viewmodel,
    keypath: Keypath,
}

impl Context<'_> {
    pub fn keypath(&self) -> &Keypath {
        &self.keypath
    }

    /// Read through the cache
    pub fn get(&mut self) -> Option<Value> {
        self.vm.read(&self.keypath)
    }

    /// Write and invalidate everything depending on this keypath
    pub fn set(&mut self, value: Value) -> Result<()> {
        self.vm.write(&self.keypath, value)
    }

    /// Re-associate per-index dependants after a structural array change
    ///
    /// The array at this keypath must already hold its new contents.
    pub fn shuffle(&mut self, new_indices: &NewIndices) -> Result<()> {
        self.vm.shuffle_at(&self.keypath, new_indices)
    }

    /// Invalidate this keypath and its descendants unconditionally
    pub fn mark(&mut self) -> Result<()> {
        self.vm.mark_at(&self.keypath)
    }
}

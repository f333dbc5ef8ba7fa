//! Keypath dependency graph
//!
//! Maps each keypath to the ordered subscribers registered on it. Pattern
//! keypaths (`items.*.done`) are kept in a separate ordered list and matched
//! against concrete keypaths at flush time.
//!
//! Subscribers are either computations (owned by the viewmodel's computation
//! registry) or external dependants such as observers and render bindings.

use rustc_hash::FxHashMap;
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::array::NewIndices;
use crate::computation::ComputationId;
use crate::keypath::Keypath;
use crate::viewmodel::Viewmodel;

new_key_type! {
    /// Unique identifier for an external dependant
    pub struct DependantId;
}

/// Anything registered on a keypath
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriberId {
    Computation(ComputationId),
    Dependant(DependantId),
}

/// What a dependant is, which decides when it is notified during a flush
///
/// Observers run before two-way bindings, which run before render bindings
/// (observers move last in a deferred cycle).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependantKind {
    Observer,
    Binding,
    Render,
}

/// Receives keypath invalidation notifications
pub trait Dependant {
    fn kind(&self) -> DependantKind;

    /// Called once per flush in which a keypath this dependant is registered
    /// on (or one of its ancestors/descendants) was invalidated
    fn update(&mut self, vm: &mut Viewmodel, keypath: &Keypath);

    /// Called when a shuffle re-associates this dependant with a new keypath
    fn rebind(&mut self, _from: &Keypath, _to: &Keypath) {}
}

/// A closure-backed dependant
pub struct FnDependant<F> {
    kind: DependantKind,
    callback: F,
}

impl<F> FnDependant<F>
where
    F: FnMut(&mut Viewmodel, &Keypath),
{
    pub fn new(kind: DependantKind, callback: F) -> Self {
        Self { kind, callback }
    }
}

impl<F> Dependant for FnDependant<F>
where
    F: FnMut(&mut Viewmodel, &Keypath),
{
    fn kind(&self) -> DependantKind {
        self.kind
    }

    fn update(&mut self, vm: &mut Viewmodel, keypath: &Keypath) {
        (self.callback)(vm, keypath)
    }
}

/// Result of re-keying registrations under an array
#[derive(Debug, Default)]
pub(crate) struct Rekeyed {
    /// Dependants that followed their element
    pub moved: Vec<(DependantId, Keypath, Keypath)>,
    /// Dependants whose element was removed; left registered where they were
    pub removed: Vec<DependantId>,
}

/// Keypath → subscribers
#[derive(Default)]
pub struct DependencyGraph {
    deps: FxHashMap<Keypath, SmallVec<[SubscriberId; 4]>>,
    patterns: Vec<(Keypath, SubscriberId)>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns `false` if it was already registered
    pub fn register(&mut self, keypath: &Keypath, sub: SubscriberId) -> bool {
        if keypath.is_pattern() {
            if self.patterns.iter().any(|(p, s)| p == keypath && *s == sub) {
                return false;
            }
            self.patterns.push((keypath.clone(), sub));
            return true;
        }

        let subs = self.deps.entry(keypath.clone()).or_default();
        if subs.contains(&sub) {
            return false;
        }
        subs.push(sub);
        true
    }

    /// Unregister a subscriber; unknown registrations are ignored
    pub fn unregister(&mut self, keypath: &Keypath, sub: SubscriberId) -> bool {
        if keypath.is_pattern() {
            let before = self.patterns.len();
            self.patterns.retain(|(p, s)| !(p == keypath && *s == sub));
            return self.patterns.len() != before;
        }

        let Some(subs) = self.deps.get_mut(keypath) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| *s != sub);
        let removed = subs.len() != before;
        if subs.is_empty() {
            self.deps.remove(keypath);
        }
        removed
    }

    /// Subscribers registered directly on `keypath`, in registration order
    pub fn subscribers(&self, keypath: &Keypath) -> &[SubscriberId] {
        self.deps.get(keypath).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// Registered keypaths touched by an invalidation of `keypath`
    ///
    /// The keypath itself comes first, then its ancestors nearest-first, then
    /// (for a deep invalidation) its descendants shallowest-first.
    pub fn affected(&self, keypath: &Keypath, deep: bool) -> Vec<Keypath> {
        let mut out = Vec::new();
        if self.deps.contains_key(keypath) {
            out.push(keypath.clone());
        }
        out.extend(keypath.ancestors().filter(|a| self.deps.contains_key(a)));

        if deep {
            let mut descendants: Vec<&Keypath> = self
                .deps
                .keys()
                .filter(|k| k.is_descendant_of(keypath))
                .collect();
            descendants.sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.cmp(b)));
            out.extend(descendants.into_iter().cloned());
        }
        out
    }

    /// Pattern subscribers touched by an invalidation of `keypath`, in
    /// registration order
    ///
    /// A pattern is touched when it matches the keypath or one of its
    /// ancestors (paired with the keypath it matched), or, for a deep
    /// invalidation, when it lies below the keypath (paired with the keypath).
    pub fn affected_patterns(&self, keypath: &Keypath, deep: bool) -> Vec<(SubscriberId, Keypath)> {
        self.patterns
            .iter()
            .filter_map(|(pattern, sub)| {
                std::iter::once(keypath.clone())
                    .chain(keypath.ancestors())
                    .find(|k| pattern.matches(k))
                    .or_else(|| (deep && pattern.matches_below(keypath)).then(|| keypath.clone()))
                    .map(|matched| (*sub, matched))
            })
            .collect()
    }

    /// Registered keypaths under `array` whose element index satisfies `pred`
    pub(crate) fn keypaths_at_indices(
        &self,
        array: &Keypath,
        pred: impl Fn(usize) -> bool,
    ) -> Vec<Keypath> {
        self.deps
            .keys()
            .filter(|k| k.index_under(array).is_some_and(|(i, _)| pred(i)))
            .cloned()
            .collect()
    }

    /// Move dependant registrations under `array` to follow their elements
    ///
    /// Computations stay where they are: they read fixed keypaths.
    pub(crate) fn rekey(&mut self, array: &Keypath, new_indices: &NewIndices) -> Rekeyed {
        let mut rekeyed = Rekeyed::default();
        let candidates = self.keypaths_at_indices(array, |i| i < new_indices.len());

        let mut relocated: Vec<(Keypath, DependantId)> = Vec::new();
        for old in candidates {
            let Some((index, rest)) = old.index_under(array) else {
                continue;
            };
            match new_indices[index] {
                Some(target) if target == index => {}
                Some(target) => {
                    let mut new = array.join(target);
                    if !rest.is_empty() {
                        new = new.join(rest);
                    }
                    let subs = self.deps.get_mut(&old).map(std::mem::take).unwrap_or_default();
                    let mut kept = SmallVec::<[SubscriberId; 4]>::new();
                    for sub in subs {
                        match sub {
                            SubscriberId::Dependant(id) => {
                                rekeyed.moved.push((id, old.clone(), new.clone()));
                                relocated.push((new.clone(), id));
                            }
                            computation => kept.push(computation),
                        }
                    }
                    if kept.is_empty() {
                        self.deps.remove(&old);
                    } else {
                        self.deps.insert(old, kept);
                    }
                }
                None => {
                    rekeyed.removed.extend(self.subscribers(&old).iter().filter_map(|s| match s {
                        SubscriberId::Dependant(id) => Some(*id),
                        SubscriberId::Computation(_) => None,
                    }));
                }
            }
        }

        // Reinsert after draining so a move never lands on a not-yet-moved entry
        for (keypath, id) in relocated {
            self.register(&keypath, SubscriberId::Dependant(id));
        }
        rekeyed
    }

    /// Number of concrete keypaths with at least one subscriber
    pub fn keypath_count(&self) -> usize {
        self.deps.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty() && self.patterns.is_empty()
    }
}

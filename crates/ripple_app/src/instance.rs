//! View instances
//!
//! [`Instance::initialise`] wires an instance in a fixed order:
//!
//! 1. merge the per-call options over the class defaults,
//! 2. resolve flags,
//! 3. validate the mode and mount target,
//! 4. allocate empty per-instance state and link parent/component,
//! 5. resolve data, then every registry,
//! 6. register computed properties,
//! 7. resolve the template and record parse options,
//! 8. perform the first render inside a runloop cycle.
//!
//! A component wrapper owns its instance; the instance only holds weak
//! references back to the component and to its parent instance.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use ripple_core::{ArrayMethod, Completion, Context, IntoKeypath, Keypath, Viewmodel};
use serde_json::Value;

use crate::config::{InstanceFlags, InstanceOptions, ParseOptions};
use crate::error::{InstanceError, Result};
use crate::registry::{self, Registry, RegistryOption};
use crate::render::{Animation, Host, MountTarget, RenderRequest, Renderer};
use crate::template::{self, Parser, ResolvedTemplate};

static NEXT_GUID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to an instance
pub type InstanceRef = Rc<RefCell<Instance>>;

/// The collaborators an instance renders through
///
/// Children initialized through a parent share its collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub host: Rc<dyn Host>,
    pub parser: Option<Rc<dyn Parser>>,
    pub renderer: Rc<dyn Renderer>,
}

/// Component wrapper owning an instance
pub struct Component {
    name: String,
    instance: Option<InstanceRef>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            name: name.into(),
            instance: None,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> Option<InstanceRef> {
        self.instance.clone()
    }
}

/// A component instance waiting for its parent's cycle to flush
pub struct PendingChild {
    pub component: Rc<RefCell<Component>>,
    pub options: InstanceOptions,
    pub defaults: InstanceOptions,
}

/// Shared queue of component instances awaiting initialization
///
/// Cloning yields another handle to the same queue, so a dependant registered
/// during render can keep queueing children after the first render returned.
/// The owning instance drains it after every cycle it runs.
#[derive(Clone, Default)]
pub struct ChildQueue(Rc<RefCell<Vec<PendingChild>>>);

impl ChildQueue {
    pub fn push(&self, child: PendingChild) {
        self.0.borrow_mut().push(child);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn take(&self) -> Vec<PendingChild> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

struct Linkage {
    parent: Weak<RefCell<Instance>>,
    component: Rc<RefCell<Component>>,
}

/// A live view instance
pub struct Instance {
    guid: u64,
    flags: InstanceFlags,
    vm: Viewmodel,
    registries: IndexMap<String, Registry>,
    template: Option<ResolvedTemplate>,
    parse_options: ParseOptions,
    target: Option<MountTarget>,
    initing: bool,
    transitions_enabled: bool,
    completion: Completion,
    animations: Vec<Box<dyn Animation>>,
    child_init_queue: ChildQueue,
    /// Keypaths this instance had to look up in ancestor scopes
    unresolved: Vec<Keypath>,
    parent: Option<Weak<RefCell<Instance>>>,
    component: Option<Weak<RefCell<Component>>>,
    collaborators: Collaborators,
    this: Weak<RefCell<Instance>>,
}

impl Instance {
    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Initialize a top-level instance
    pub fn initialise(
        options: InstanceOptions,
        defaults: &InstanceOptions,
        collaborators: Collaborators,
    ) -> Result<InstanceRef> {
        Self::build(options, defaults, collaborators, None)
    }

    /// Initialize a component instance under `parent`, storing it on `component`
    pub fn initialise_child(
        parent: &InstanceRef,
        component: &Rc<RefCell<Component>>,
        options: InstanceOptions,
        defaults: &InstanceOptions,
    ) -> Result<InstanceRef> {
        let collaborators = parent.borrow().collaborators.clone();
        let linkage = Linkage {
            parent: Rc::downgrade(parent),
            component: component.clone(),
        };
        Self::build(options, defaults, collaborators, Some(linkage))
    }

    fn build(
        mut own: InstanceOptions,
        defaults: &InstanceOptions,
        collaborators: Collaborators,
        linkage: Option<Linkage>,
    ) -> Result<InstanceRef> {
        let mut defaults = defaults.clone();
        defaults.migrate_deprecated();
        own.migrate_deprecated();
        let options = own.clone().merged_over(&defaults);

        let flags = InstanceFlags::resolve(&options);

        if flags.magic && !collaborators.host.supports_accessors() {
            return Err(InstanceError::UnsupportedMode);
        }
        let target = match options.el.as_deref() {
            None => None,
            Some(selector) => match collaborators.host.find_target(selector) {
                Some(target) => Some(target),
                None if flags.debug => {
                    return Err(InstanceError::TargetNotFound(selector.to_string()))
                }
                None => {
                    tracing::debug!("mount target {} not found; rendering without one", selector);
                    None
                }
            },
        };

        let guid = NEXT_GUID.fetch_add(1, Ordering::Relaxed);
        let instance = Rc::new(RefCell::new(Instance {
            guid,
            flags,
            vm: Viewmodel::default(),
            registries: IndexMap::new(),
            template: None,
            parse_options: ParseOptions::default(),
            target,
            initing: true,
            transitions_enabled: false,
            completion: Completion::new(),
            animations: Vec::new(),
            child_init_queue: ChildQueue::default(),
            unresolved: Vec::new(),
            parent: None,
            component: None,
            collaborators,
            this: Weak::new(),
        }));
        instance.borrow_mut().this = Rc::downgrade(&instance);

        if let Some(link) = &linkage {
            let mut inst = instance.borrow_mut();
            inst.parent = Some(link.parent.clone());
            inst.component = Some(Rc::downgrade(&link.component));
            link.component.borrow_mut().instance = Some(instance.clone());
            tracing::debug!(
                "initialising instance {} as component {}",
                guid,
                link.component.borrow().name
            );
        } else {
            tracing::debug!("initialising instance {}", guid);
        }

        if let Err(err) = Self::wire(&instance, &own, &options, &defaults) {
            if let Some(link) = linkage {
                link.component.borrow_mut().instance = None;
            }
            return Err(err);
        }

        if let Some(complete) = options.complete.clone() {
            let completion = instance.borrow().completion.clone();
            completion.on_complete(move || complete());
        }

        // The parent stays unborrowed so first-render children can read its scope
        let (pending, collaborators) = {
            let inst = instance.borrow();
            (inst.child_init_queue.take(), inst.collaborators.clone())
        };
        Self::init_children(pending, &Rc::downgrade(&instance), &collaborators)?;
        Ok(instance)
    }

    /// Steps 5 to 8, on freshly allocated state
    fn wire(
        this: &InstanceRef,
        own: &InstanceOptions,
        options: &InstanceOptions,
        defaults: &InstanceOptions,
    ) -> Result<()> {
        let mut guard = this.borrow_mut();
        let inst = &mut *guard;
        let host = inst.collaborators.host.clone();

        // Data goes first: it is the argument to registry factories
        inst.vm = Viewmodel::new(registry::resolve_data(
            own.data.as_ref(),
            defaults.data.as_ref(),
            options,
        ));
        for name in registry::registry_names(own, defaults) {
            let resolved = registry::resolve_registry(
                own.registries.get(&name),
                defaults.registries.get(&name),
                inst.vm.data(),
                options,
            );
            inst.registries.insert(name, resolved);
        }

        let mut computed = defaults.computed.clone();
        computed.extend(own.computed.clone());
        for (name, definition) in computed {
            inst.vm.compute(&name, definition)?;
        }

        let parse_options = options.parse_options();
        let source = template::select(options, defaults, inst.vm.data());
        let parser = inst.collaborators.parser.clone();
        let partials = inst.registries.entry("partials".to_string()).or_default();
        inst.template = template::resolve(
            source,
            parser.as_deref(),
            &*host,
            &parse_options,
            partials,
        )?;
        if let Some(RegistryOption::Map(extra)) = own.registries.get("partials") {
            partials.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        inst.parse_options = parse_options;

        // First render; intro transitions are off for this render only
        let append = options.append.unwrap_or(false);
        let transitions_enabled = options.transitions_enabled.unwrap_or(true);
        inst.transitions_enabled = transitions_enabled && !options.no_intro.unwrap_or(false);

        if inst.target.is_none() && host.is_client() {
            inst.target = Some(MountTarget::Fragment);
        } else if let Some(target) = inst.target.as_ref().filter(|_| !append) {
            host.clear(target);
        }

        let renderer = inst.collaborators.renderer.clone();
        let cycle = inst.vm.start(false);
        let rendered = Completion::new();
        let outcome = renderer.render(
            RenderRequest {
                vm: &mut inst.vm,
                template: inst.template.as_ref(),
                partials: inst.registries.get("partials"),
                target: inst.target.as_ref(),
                append,
                transitions_enabled: inst.transitions_enabled,
                children: inst.child_init_queue.clone(),
            },
            rendered.clone(),
        );
        inst.vm.end()?;
        outcome?;

        inst.initing = false;
        inst.transitions_enabled = transitions_enabled;
        inst.completion = cycle.join(&rendered);
        tracing::debug!(
            "instance {} rendered ({} registries, {} computations)",
            inst.guid,
            inst.registries.len(),
            inst.vm.stats().computations
        );
        Ok(())
    }

    /// Queue a component instance for initialization after the current cycle
    pub fn queue_child_init(&mut self, child: PendingChild) {
        self.child_init_queue.push(child);
    }

    /// Another handle to this instance's child queue
    pub fn child_queue(&self) -> ChildQueue {
        self.child_init_queue.clone()
    }

    /// Initialize every queued child under this instance; returns how many ran
    ///
    /// Never borrows the parent, so it runs while the parent is mutably
    /// borrowed. Children queued by a child's own first render go to that
    /// child's queue.
    pub fn flush_child_inits(&mut self) -> Result<usize> {
        let count = Self::init_children(
            self.child_init_queue.take(),
            &self.this,
            &self.collaborators,
        )?;
        if count > 0 {
            tracing::debug!("instance {} initialised {} queued children", self.guid, count);
        }
        Ok(count)
    }

    fn init_children(
        pending: Vec<PendingChild>,
        parent: &Weak<RefCell<Instance>>,
        collaborators: &Collaborators,
    ) -> Result<usize> {
        let count = pending.len();
        for child in pending {
            let linkage = Linkage {
                parent: parent.clone(),
                component: child.component,
            };
            Self::build(child.options, &child.defaults, collaborators.clone(), Some(linkage))?;
        }
        Ok(count)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn guid(&self) -> u64 {
        self.guid
    }

    pub fn flags(&self) -> &InstanceFlags {
        &self.flags
    }

    pub fn viewmodel(&self) -> &Viewmodel {
        &self.vm
    }

    pub fn viewmodel_mut(&mut self) -> &mut Viewmodel {
        &mut self.vm
    }

    pub fn registry(&self, name: &str) -> Option<&Registry> {
        self.registries.get(name)
    }

    pub fn partials(&self) -> Option<&Registry> {
        self.registry("partials")
    }

    pub fn template(&self) -> Option<&ResolvedTemplate> {
        self.template.as_ref()
    }

    pub fn parse_options(&self) -> &ParseOptions {
        &self.parse_options
    }

    pub fn target(&self) -> Option<&MountTarget> {
        self.target.as_ref()
    }

    /// True until the first render call has returned
    pub fn is_initing(&self) -> bool {
        self.initing
    }

    pub fn transitions_enabled(&self) -> bool {
        self.transitions_enabled
    }

    /// Resolves once the first render's cycle has flushed and the renderer
    /// has reported completion
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn parent(&self) -> Option<InstanceRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn component(&self) -> Option<Rc<RefCell<Component>>> {
        self.component.as_ref().and_then(Weak::upgrade)
    }

    pub fn unresolved(&self) -> &[Keypath] {
        &self.unresolved
    }

    pub fn add_animation(&mut self, animation: Box<dyn Animation>) {
        self.animations.push(animation);
    }

    pub fn animation_count(&self) -> usize {
        self.animations.len()
    }

    // =========================================================================
    // DATA
    // =========================================================================

    pub fn context(&mut self, keypath: impl IntoKeypath) -> Result<Context<'_>> {
        Ok(self.vm.context(keypath)?)
    }

    /// Read a value, falling back to ancestor scopes unless isolated
    pub fn get(&mut self, keypath: impl IntoKeypath) -> Option<Value> {
        let keypath = keypath.into_keypath().ok()?;
        if let Some(value) = self.vm.get(&keypath) {
            return Some(value);
        }
        if self.flags.isolated {
            return None;
        }

        let parent = self.parent()?;
        if !self.unresolved.contains(&keypath) {
            self.unresolved.push(keypath.clone());
        }
        let value = match parent.try_borrow_mut() {
            Ok(mut parent) => parent.get(&keypath),
            Err(_) => {
                tracing::warn!(
                    "parent of instance {} is busy; {} left unresolved",
                    self.guid,
                    keypath
                );
                None
            }
        };
        value
    }

    /// Write a value in its own (deferred) cycle
    pub fn set(&mut self, keypath: impl IntoKeypath, value: Value) -> Result<Completion> {
        let keypath = keypath.into_keypath()?;
        let completion = self.vm.start(true);
        let outcome = self.vm.set(&keypath, value);
        self.vm.end()?;
        outcome?;
        self.flush_child_inits()?;
        Ok(completion)
    }

    /// Force everything depending on `keypath` to update
    pub fn update(&mut self, keypath: impl IntoKeypath) -> Result<Completion> {
        let keypath = keypath.into_keypath()?;
        let completion = self.vm.start(true);
        let outcome = self.vm.mark(&keypath);
        self.vm.end()?;
        outcome?;
        self.flush_child_inits()?;
        Ok(completion)
    }

    fn array_method(
        &mut self,
        keypath: impl IntoKeypath,
        method: ArrayMethod,
    ) -> Result<(Value, Completion)> {
        let result = self.vm.mutate_array(keypath, method)?;
        self.flush_child_inits()?;
        Ok(result)
    }

    pub fn push(&mut self, keypath: impl IntoKeypath, items: Vec<Value>) -> Result<(Value, Completion)> {
        self.array_method(keypath, ArrayMethod::Push(items))
    }

    pub fn pop(&mut self, keypath: impl IntoKeypath) -> Result<(Value, Completion)> {
        self.array_method(keypath, ArrayMethod::Pop)
    }

    pub fn shift(&mut self, keypath: impl IntoKeypath) -> Result<(Value, Completion)> {
        self.array_method(keypath, ArrayMethod::Shift)
    }

    pub fn unshift(&mut self, keypath: impl IntoKeypath, items: Vec<Value>) -> Result<(Value, Completion)> {
        self.array_method(keypath, ArrayMethod::Unshift(items))
    }

    pub fn splice(
        &mut self,
        keypath: impl IntoKeypath,
        start: i64,
        delete_count: Option<usize>,
        items: Vec<Value>,
    ) -> Result<(Value, Completion)> {
        self.array_method(
            keypath,
            ArrayMethod::Splice {
                start,
                delete_count,
                items,
            },
        )
    }

    pub fn sort(&mut self, keypath: impl IntoKeypath) -> Result<(Value, Completion)> {
        self.array_method(keypath, ArrayMethod::Sort)
    }

    pub fn reverse(&mut self, keypath: impl IntoKeypath) -> Result<(Value, Completion)> {
        self.array_method(keypath, ArrayMethod::Reverse)
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Stop animations and unlink from the component
    ///
    /// Fails with [`ripple_core::CoreError::CycleLeftOpen`] if a runloop
    /// cycle is still open; teardown itself has completed by then.
    pub fn teardown(&mut self) -> Result<()> {
        for mut animation in self.animations.drain(..) {
            animation.stop();
        }

        if let Some(component) = self.component.take().and_then(|c| c.upgrade()) {
            match component.try_borrow_mut() {
                Ok(mut component) => component.instance = None,
                Err(_) => tracing::warn!(
                    "component of instance {} is busy; left linked",
                    self.guid
                ),
            }
        }
        self.parent = None;
        let dropped = self.child_init_queue.take();
        if !dropped.is_empty() {
            tracing::debug!("instance {} dropped {} queued children", self.guid, dropped.len());
        }

        tracing::debug!("instance {} torn down", self.guid);
        Ok(self.vm.ensure_closed()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Adapt;
    use crate::template::{Parsed, TemplateOption, TemplateSource};
    use ripple_core::{Computed, CoreError, DependantKind};
    use serde_json::json;
    use std::cell::Cell;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[derive(Default)]
    struct TestHost {
        client: bool,
        no_accessors: bool,
        targets: Vec<&'static str>,
        cleared: RefCell<Vec<MountTarget>>,
    }

    impl Host for TestHost {
        fn find_target(&self, selector: &str) -> Option<MountTarget> {
            self.targets
                .iter()
                .any(|t| *t == selector)
                .then(|| MountTarget::Element(selector.to_string()))
        }

        fn supports_accessors(&self) -> bool {
            !self.no_accessors
        }

        fn is_client(&self) -> bool {
            self.client
        }

        fn clear(&self, target: &MountTarget) {
            self.cleared.borrow_mut().push(target.clone());
        }
    }

    /// Mustache-ish sources become a one-node AST; anything else is literal
    struct TestParser;

    impl Parser for TestParser {
        fn parse(&self, source: &str, _options: &ParseOptions) -> anyhow::Result<Parsed> {
            if source.contains("{{") {
                Ok(Parsed::Template(json!([{ "t": 4, "src": source }])))
            } else {
                Ok(Parsed::Template(json!([source])))
            }
        }
    }

    #[derive(Debug, Clone)]
    struct RenderLog {
        initing_items: Option<Value>,
        transitions_enabled: bool,
        append: bool,
        target: Option<MountTarget>,
    }

    #[derive(Default)]
    struct TestRenderer {
        defer: bool,
        renders: RefCell<Vec<RenderLog>>,
        pending: RefCell<Vec<Completion>>,
        section_updates: Rc<Cell<u32>>,
        queue: RefCell<Vec<PendingChild>>,
    }

    impl Renderer for TestRenderer {
        fn render(&self, request: RenderRequest<'_>, on_complete: Completion) -> anyhow::Result<()> {
            let updates = self.section_updates.clone();
            request
                .vm
                .subscribe("items", DependantKind::Render, move |_, _| {
                    updates.set(updates.get() + 1)
                })?;

            self.renders.borrow_mut().push(RenderLog {
                initing_items: request.vm.get("items.0"),
                transitions_enabled: request.transitions_enabled,
                append: request.append,
                target: request.target.cloned(),
            });
            for child in self.queue.borrow_mut().drain(..) {
                request.children.push(child);
            }

            if self.defer {
                self.pending.borrow_mut().push(on_complete);
            } else {
                on_complete.fulfil();
            }
            Ok(())
        }
    }

    fn collaborators(host: Rc<TestHost>, renderer: Rc<TestRenderer>) -> Collaborators {
        Collaborators {
            host,
            parser: Some(Rc::new(TestParser)),
            renderer,
        }
    }

    fn items_options() -> InstanceOptions {
        InstanceOptions::new()
            .with_data(json!({ "items": [1, 2, 3] }))
            .with_template("{{#items}}{{.}}{{/items}}")
    }

    fn init(options: InstanceOptions) -> (InstanceRef, Rc<TestRenderer>) {
        let renderer = Rc::new(TestRenderer::default());
        let instance = Instance::initialise(
            options,
            &InstanceOptions::defaults(),
            collaborators(Rc::new(TestHost::default()), renderer.clone()),
        )
        .unwrap();
        (instance, renderer)
    }

    #[test]
    fn test_items_scenario() {
        init_tracing();
        let (instance, renderer) = init(items_options());
        let mut inst = instance.borrow_mut();

        assert!(inst.completion().is_complete());
        assert!(!inst.is_initing());
        assert_eq!(inst.target(), None);
        assert!(matches!(inst.template(), Some(ResolvedTemplate::Ast(_))));
        assert_eq!(inst.context("items.0").unwrap().get(), Some(json!(1)));

        let renders = renderer.renders.borrow();
        assert_eq!(renders.len(), 1);
        assert_eq!(renders[0].initing_items, Some(json!(1)));
        assert!(!renders[0].append);
    }

    #[test]
    fn test_push_scenario() {
        let (instance, renderer) = init(items_options());
        let mut inst = instance.borrow_mut();

        let (length, done) = inst.push("items", vec![json!(4)]).unwrap();
        assert_eq!(length, json!(4));
        assert!(done.is_complete());
        assert_eq!(inst.context("items.3").unwrap().get(), Some(json!(4)));
        assert_eq!(renderer.section_updates.get(), 1);
    }

    #[test]
    fn test_sort_scenario() {
        let (instance, _) = init(
            InstanceOptions::new().with_data(json!({ "items": [3, 1, 2] })),
        );
        let mut inst = instance.borrow_mut();
        let element = Rc::new(Cell::new(0));
        let e = element.clone();
        inst.viewmodel_mut()
            .subscribe("items.0", DependantKind::Render, move |_, _| e.set(e.get() + 1))
            .unwrap();
        assert_eq!(inst.get("items.0"), Some(json!(3)));

        let (sorted, _) = inst.sort("items").unwrap();
        assert_eq!(sorted, json!([1, 2, 3]));
        assert_eq!(element.get(), 1);
        assert_eq!(inst.get("items.0"), Some(json!(1)));
        assert_eq!(inst.get("items.2"), Some(json!(3)));
    }

    #[test]
    fn test_array_methods() {
        let (instance, _) = init(items_options());
        let mut inst = instance.borrow_mut();

        assert_eq!(inst.pop("items").unwrap().0, json!(3));
        assert_eq!(inst.shift("items").unwrap().0, json!(1));
        assert_eq!(inst.unshift("items", vec![json!(0)]).unwrap().0, json!(2));
        assert_eq!(
            inst.splice("items", 1, Some(1), vec![json!(7), json!(8)]).unwrap().0,
            json!([2])
        );
        assert_eq!(inst.reverse("items").unwrap().0, json!([8, 7, 0]));
        assert_eq!(inst.get("items.length"), Some(json!(3)));
    }

    #[test]
    fn test_array_method_on_non_array() {
        let (instance, _) = init(InstanceOptions::new().with_data(json!({ "name": "x" })));
        let err = instance.borrow_mut().push("name", vec![json!(1)]).unwrap_err();
        assert!(matches!(
            err,
            InstanceError::Core(CoreError::NotAnArray { method: "push", .. })
        ));
    }

    #[test]
    fn test_set_and_update() {
        let (instance, renderer) = init(items_options());
        let mut inst = instance.borrow_mut();

        let done = inst.set("items.0", json!(10)).unwrap();
        assert!(done.is_complete());
        assert_eq!(renderer.section_updates.get(), 1);
        assert_eq!(inst.get("items.0"), Some(json!(10)));

        inst.update("items").unwrap();
        assert_eq!(renderer.section_updates.get(), 2);
    }

    #[test]
    fn test_magic_requires_accessors() {
        let host = Rc::new(TestHost {
            no_accessors: true,
            ..TestHost::default()
        });
        let err = Instance::initialise(
            InstanceOptions::new().with_magic(true),
            &InstanceOptions::defaults(),
            collaborators(host, Rc::new(TestRenderer::default())),
        )
        .err();
        assert!(matches!(err, Some(InstanceError::UnsupportedMode)));
    }

    #[test]
    fn test_missing_target() {
        let host = Rc::new(TestHost::default());
        let err = Instance::initialise(
            InstanceOptions::new().with_el("#nowhere").with_debug(true),
            &InstanceOptions::defaults(),
            collaborators(host.clone(), Rc::new(TestRenderer::default())),
        )
        .err();
        assert!(matches!(err, Some(InstanceError::TargetNotFound(s)) if s == "#nowhere"));

        let instance = Instance::initialise(
            InstanceOptions::new().with_el("#nowhere"),
            &InstanceOptions::defaults(),
            collaborators(host, Rc::new(TestRenderer::default())),
        )
        .unwrap();
        assert_eq!(instance.borrow().target(), None);
    }

    #[test]
    fn test_target_cleared_unless_appending() {
        let host = Rc::new(TestHost {
            targets: vec!["#app"],
            ..TestHost::default()
        });
        let renderer = Rc::new(TestRenderer::default());

        Instance::initialise(
            InstanceOptions::new().with_el("#app"),
            &InstanceOptions::defaults(),
            collaborators(host.clone(), renderer.clone()),
        )
        .unwrap();
        Instance::initialise(
            InstanceOptions::new().with_el("#app").with_append(true),
            &InstanceOptions::defaults(),
            collaborators(host.clone(), renderer.clone()),
        )
        .unwrap();

        assert_eq!(
            host.cleared.borrow().as_slice(),
            [MountTarget::Element("#app".into())]
        );
        let renders = renderer.renders.borrow();
        assert_eq!(renders[1].target, Some(MountTarget::Element("#app".into())));
        assert!(renders[1].append);
    }

    #[test]
    fn test_client_without_target_renders_to_fragment() {
        let host = Rc::new(TestHost {
            client: true,
            ..TestHost::default()
        });
        let instance = Instance::initialise(
            InstanceOptions::new(),
            &InstanceOptions::defaults(),
            collaborators(host.clone(), Rc::new(TestRenderer::default())),
        )
        .unwrap();

        assert_eq!(instance.borrow().target(), Some(&MountTarget::Fragment));
        assert!(host.cleared.borrow().is_empty());
    }

    #[test]
    fn test_no_intro_only_affects_first_render() {
        let (instance, renderer) = init(items_options().with_no_intro(true));
        assert!(!renderer.renders.borrow()[0].transitions_enabled);
        assert!(instance.borrow().transitions_enabled());

        let (instance, renderer) = init(items_options().with_transitions_enabled(false));
        assert!(!renderer.renders.borrow()[0].transitions_enabled);
        assert!(!instance.borrow().transitions_enabled());
    }

    #[test]
    fn test_completion_waits_for_renderer() {
        let renderer = Rc::new(TestRenderer {
            defer: true,
            ..TestRenderer::default()
        });
        let completed = Rc::new(Cell::new(0));
        let c = completed.clone();

        let instance = Instance::initialise(
            items_options().with_complete(move || c.set(c.get() + 1)),
            &InstanceOptions::defaults(),
            collaborators(Rc::new(TestHost::default()), renderer.clone()),
        )
        .unwrap();

        assert!(!instance.borrow().is_initing());
        assert!(!instance.borrow().completion().is_complete());
        assert_eq!(completed.get(), 0);

        for pending in renderer.pending.borrow_mut().drain(..) {
            pending.fulfil();
        }
        assert!(instance.borrow().completion().is_complete());
        assert_eq!(completed.get(), 1);
    }

    #[test]
    fn test_complete_callback_after_synchronous_render() {
        let completed = Rc::new(Cell::new(false));
        let c = completed.clone();
        init(items_options().with_complete(move || c.set(true)));
        assert!(completed.get());
    }

    #[test]
    fn test_missing_parser() {
        let err = Instance::initialise(
            items_options(),
            &InstanceOptions::defaults(),
            Collaborators {
                host: Rc::new(TestHost::default()),
                parser: None,
                renderer: Rc::new(TestRenderer::default()),
            },
        )
        .err();
        assert!(matches!(err, Some(InstanceError::MissingParser)));
    }

    #[test]
    fn test_registries_computed_and_partials() {
        let mut default_partials = Registry::new();
        default_partials.insert("row".into(), json!("default row"));
        default_partials.insert("cell".into(), json!("default cell"));
        let defaults = InstanceOptions::defaults()
            .with_partials(default_partials)
            .with_computed("total", Computed::new(|_| json!("default")))
            .with_registry(
                "easing",
                RegistryOption::factory(|data, _| {
                    let mut easing = Registry::new();
                    easing.insert("steps".into(), data["steps"].clone());
                    Some(easing)
                }),
            );

        let mut own_partials = Registry::new();
        own_partials.insert("row".into(), json!("my row"));
        let mut bundled = IndexMap::new();
        bundled.insert("row".to_string(), json!(["parsed row"]));
        bundled.insert("item".to_string(), json!(["parsed item"]));
        let options = InstanceOptions::new()
            .with_data(json!({ "steps": 4, "n": 2 }))
            .with_partials(own_partials)
            .with_computed(
                "total",
                Computed::new(|vm| json!(vm.get("n").and_then(|v| v.as_i64()).unwrap_or(0) * 10)),
            )
            .with_template_option(TemplateOption::Source(TemplateSource::Parsed(
                Parsed::WithPartials {
                    main: json!(["<ul></ul>"]),
                    partials: bundled,
                },
            )));

        let instance = Instance::initialise(
            options,
            &defaults,
            collaborators(Rc::new(TestHost::default()), Rc::new(TestRenderer::default())),
        )
        .unwrap();
        let mut inst = instance.borrow_mut();

        assert_eq!(inst.template(), Some(&ResolvedTemplate::Html("<ul></ul>".into())));
        let partials = inst.partials().unwrap();
        assert_eq!(partials["row"], json!("my row"));
        assert_eq!(partials["cell"], json!("default cell"));
        assert_eq!(partials["item"], json!(["parsed item"]));
        assert_eq!(inst.registry("easing").unwrap()["steps"], json!(4));
        assert!(inst.registry("transitions").unwrap().is_empty());

        assert_eq!(inst.viewmodel().evaluations("total"), Some(0));
        assert_eq!(inst.get("total"), Some(json!(20)));
    }

    #[test]
    fn test_flags_and_deprecations() {
        let (instance, _) = init(InstanceOptions {
            adaptors: Some(vec!["Backbone".into()]),
            ..items_options()
        });
        assert_eq!(instance.borrow().flags().adapt, vec!["Backbone".to_string()]);

        let (instance, _) = init(items_options().with_adapt(Adapt::One("Ember".into())));
        let inst = instance.borrow();
        assert_eq!(inst.flags().adapt, vec!["Ember".to_string()]);
        assert!(inst.flags().twoway);
        assert!(inst.parse_options().strip_comments);
    }

    #[test]
    fn test_guids_are_unique() {
        let (a, _) = init(items_options());
        let (b, _) = init(items_options());
        assert_ne!(a.borrow().guid(), b.borrow().guid());
    }

    #[test]
    fn test_child_linkage_and_scoped_lookup() {
        let (parent, _) = init(InstanceOptions::new().with_data(json!({ "user": { "name": "Ada" } })));
        let component = Component::new("Card");

        let child = Instance::initialise_child(
            &parent,
            &component,
            InstanceOptions::new().with_data(json!({ "title": "hello" })),
            &InstanceOptions::defaults(),
        )
        .unwrap();

        let owned = component.borrow().instance().unwrap();
        assert!(Rc::ptr_eq(&owned, &child));
        let mut inst = child.borrow_mut();
        assert!(Rc::ptr_eq(&inst.parent().unwrap(), &parent));
        assert_eq!(inst.component().unwrap().borrow().name(), "Card");

        assert_eq!(inst.get("title"), Some(json!("hello")));
        assert!(inst.unresolved().is_empty());
        assert_eq!(inst.get("user.name"), Some(json!("Ada")));
        assert_eq!(inst.unresolved(), &[Keypath::parse("user.name").unwrap()]);
    }

    #[test]
    fn test_isolated_child_does_not_reach_parent() {
        let (parent, _) = init(InstanceOptions::new().with_data(json!({ "user": "Ada" })));
        let component = Component::new("Card");
        let child = Instance::initialise_child(
            &parent,
            &component,
            InstanceOptions::new().with_isolated(true),
            &InstanceOptions::defaults(),
        )
        .unwrap();

        let mut inst = child.borrow_mut();
        assert_eq!(inst.get("user"), None);
        assert!(inst.unresolved().is_empty());
    }

    #[test]
    fn test_failed_child_is_unlinked() {
        let (parent, _) = init(InstanceOptions::new());
        let component = Component::new("Broken");
        let err = Instance::initialise_child(
            &parent,
            &component,
            InstanceOptions::new().with_el("#missing").with_debug(true),
            &InstanceOptions::defaults(),
        );
        assert!(err.is_err());
        assert!(component.borrow().instance().is_none());

        // a failure after allocation unlinks as well
        let err = Instance::initialise_child(
            &parent,
            &component,
            InstanceOptions::new()
                .with_computed("bad..name", Computed::new(|_| Value::Null)),
            &InstanceOptions::defaults(),
        );
        assert!(matches!(err, Err(InstanceError::Core(CoreError::InvalidKeypath(_)))));
        assert!(component.borrow().instance().is_none());
    }

    #[test]
    fn test_children_queued_during_first_render() {
        let renderer = Rc::new(TestRenderer::default());
        let component = Component::new("Row");
        renderer.queue.borrow_mut().push(PendingChild {
            component: component.clone(),
            options: InstanceOptions::new().with_data(json!({ "label": "first" })),
            defaults: InstanceOptions::defaults(),
        });

        let parent = Instance::initialise(
            items_options(),
            &InstanceOptions::defaults(),
            collaborators(Rc::new(TestHost::default()), renderer.clone()),
        )
        .unwrap();

        let child = component.borrow().instance().unwrap();
        assert!(Rc::ptr_eq(&child.borrow().parent().unwrap(), &parent));
        assert_eq!(renderer.renders.borrow().len(), 2);
        assert_eq!(parent.borrow_mut().flush_child_inits().unwrap(), 0);
    }

    #[test]
    fn test_children_queued_after_init_are_flushed() {
        let (parent, _) = init(
            InstanceOptions::new().with_data(json!({ "show": false })),
        );
        let component = Component::new("Late");
        let mut inst = parent.borrow_mut();

        let queue = inst.child_queue();
        let pending = component.clone();
        inst.viewmodel_mut()
            .observe("show", move |vm, keypath| {
                if vm.get(keypath) == Some(json!(true)) {
                    queue.push(PendingChild {
                        component: pending.clone(),
                        options: InstanceOptions::new().with_data(json!({ "label": "late" })),
                        defaults: InstanceOptions::defaults(),
                    });
                }
            })
            .unwrap();
        assert!(component.borrow().instance().is_none());

        inst.set("show", json!(true)).unwrap();
        assert!(inst.child_queue().is_empty());
        drop(inst);

        let child = component.borrow().instance().unwrap();
        assert!(Rc::ptr_eq(&child.borrow().parent().unwrap(), &parent));
        assert_eq!(child.borrow_mut().get("label"), Some(json!("late")));
    }

    struct TestAnimation(Rc<Cell<bool>>);

    impl Animation for TestAnimation {
        fn stop(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn test_teardown() {
        let (parent, _) = init(items_options());
        let component = Component::new("Card");
        let child = Instance::initialise_child(
            &parent,
            &component,
            InstanceOptions::new(),
            &InstanceOptions::defaults(),
        )
        .unwrap();

        let stopped = Rc::new(Cell::new(false));
        let mut inst = child.borrow_mut();
        inst.add_animation(Box::new(TestAnimation(stopped.clone())));
        inst.teardown().unwrap();

        assert!(stopped.get());
        assert_eq!(inst.animation_count(), 0);
        assert!(component.borrow().instance().is_none());
        assert!(inst.parent().is_none());
    }

    #[test]
    fn test_teardown_detects_open_cycle() {
        let (instance, _) = init(items_options());
        let mut inst = instance.borrow_mut();

        inst.viewmodel_mut().start(false);
        let err = inst.teardown().unwrap_err();
        assert!(matches!(err, InstanceError::Core(CoreError::CycleLeftOpen(1))));
        inst.viewmodel_mut().end().unwrap();
    }
}

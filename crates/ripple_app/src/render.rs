//! Rendering collaborators
//!
//! The instance never touches a document itself. A [`Host`] resolves mount
//! targets and template elements, a [`Renderer`] performs the first render
//! and registers its bindings on the viewmodel, and in-flight [`Animation`]s
//! are stopped at teardown.

use ripple_core::{Completion, Viewmodel};

use crate::instance::ChildQueue;
use crate::registry::Registry;
use crate::template::ResolvedTemplate;

/// Where an instance renders
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountTarget {
    /// An element resolved from a selector
    Element(String),
    /// A detached fragment, used on client hosts when no target was given
    Fragment,
}

/// The environment an instance runs in
pub trait Host {
    /// Resolve a mount target selector
    fn find_target(&self, selector: &str) -> Option<MountTarget>;

    /// Whether property accessors (magic mode) are available
    fn supports_accessors(&self) -> bool {
        true
    }

    /// Whether this host has a live document
    fn is_client(&self) -> bool {
        false
    }

    /// Source text of the template element with this id
    fn template_source(&self, _id: &str) -> Option<String> {
        None
    }

    /// Remove existing content from a target before a non-appending render
    fn clear(&self, _target: &MountTarget) {}
}

/// Everything a renderer gets for one render
pub struct RenderRequest<'a> {
    pub vm: &'a mut Viewmodel,
    pub template: Option<&'a ResolvedTemplate>,
    pub partials: Option<&'a Registry>,
    pub target: Option<&'a MountTarget>,
    pub append: bool,
    pub transitions_enabled: bool,
    /// Component instances to initialize once this render's cycle has flushed;
    /// the handle stays valid for dependants that queue children later
    pub children: ChildQueue,
}

/// Renders a template against a viewmodel
pub trait Renderer {
    /// Render inside the caller's open runloop cycle
    ///
    /// `on_complete` must be fulfilled exactly once, when the render is
    /// committed; it may be fulfilled after this call returns.
    fn render(&self, request: RenderRequest<'_>, on_complete: Completion) -> anyhow::Result<()>;
}

/// An in-flight animation
pub trait Animation {
    fn stop(&mut self);
}

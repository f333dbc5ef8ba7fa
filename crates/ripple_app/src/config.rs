//! Instance options
//!
//! Options are resolved at two levels: the per-call [`InstanceOptions`] and a
//! class-level set of defaults of the same type. Plain values take the
//! instance value when present and the class default otherwise; registries,
//! data and templates have their own precedence rules (see [`crate::registry`]
//! and [`crate::template`]).
//!
//! Plain options can also be read from a JSON value or a TOML document:
//!
//! ```rust
//! use ripple_app::InstanceOptions;
//!
//! let options = InstanceOptions::from_toml_str(r#"
//!     adapt = "Backbone"
//!     twoway = false
//!     noIntro = true
//!     template = "{{greeting}}"
//!
//!     [data]
//!     greeting = "hello"
//! "#).unwrap();
//!
//! assert_eq!(options.twoway, Some(false));
//! assert_eq!(options.no_intro, Some(true));
//! ```

use std::rc::Rc;

use indexmap::IndexMap;
use ripple_core::Computed;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::registry::{DataOption, Registry, RegistryOption};
use crate::template::{TemplateOption, TemplateSource};

/// Callback run once the first render has completed
pub type CompleteCallback = Rc<dyn Fn()>;

/// Adaptor names, given as one name or a list
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Adapt {
    One(String),
    Many(Vec<String>),
}

impl Adapt {
    /// A single name becomes a one-element list
    pub fn into_list(self) -> Vec<String> {
        match self {
            Adapt::One(name) => vec![name],
            Adapt::Many(names) => names,
        }
    }
}

/// Every option recognized at initialization
///
/// `None` (or an empty map) means "not given"; class defaults fill the gaps.
#[derive(Clone, Default)]
pub struct InstanceOptions {
    // Flags
    pub adapt: Option<Adapt>,
    pub modify_arrays: Option<bool>,
    pub magic: Option<bool>,
    pub twoway: Option<bool>,
    pub lazy: Option<bool>,
    pub debug: Option<bool>,
    pub isolated: Option<bool>,

    pub data: Option<DataOption>,
    pub template: Option<TemplateOption>,
    pub computed: IndexMap<String, Computed>,
    /// Registries by name: `partials`, `transitions`, `components`,
    /// `decorators`, `events`, `adaptors` or any custom name
    pub registries: IndexMap<String, RegistryOption>,

    // Rendering
    pub el: Option<String>,
    pub append: Option<bool>,
    pub no_intro: Option<bool>,
    pub transitions_enabled: Option<bool>,
    pub complete: Option<CompleteCallback>,

    // Parsing
    pub preserve_whitespace: Option<bool>,
    pub sanitize: Option<bool>,
    pub strip_comments: Option<bool>,

    /// Deprecated: adaptor names, superseded by `adapt`
    pub adaptors: Option<Vec<String>>,
    /// Deprecated: superseded by the `events` registry
    pub event_definitions: Option<RegistryOption>,
}

impl InstanceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The library's own class defaults
    pub fn defaults() -> Self {
        Self {
            adapt: Some(Adapt::Many(Vec::new())),
            modify_arrays: Some(true),
            magic: Some(false),
            twoway: Some(true),
            lazy: Some(false),
            debug: Some(false),
            isolated: Some(false),
            append: Some(false),
            no_intro: Some(false),
            transitions_enabled: Some(true),
            preserve_whitespace: Some(false),
            sanitize: Some(false),
            strip_comments: Some(true),
            ..Self::default()
        }
    }

    /// Read plain options from a JSON value
    pub fn from_json(value: Value) -> Result<Self> {
        let plain: PlainOptions = serde_json::from_value(value)?;
        Ok(plain.into())
    }

    /// Read plain options from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let plain: PlainOptions = toml::from_str(source)?;
        Ok(plain.into())
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(DataOption::Value(data));
        self
    }

    pub fn with_data_fn<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Value, &InstanceOptions) -> Option<Value> + 'static,
    {
        self.data = Some(DataOption::Factory(Rc::new(factory)));
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(TemplateOption::Source(TemplateSource::Text(template.into())));
        self
    }

    pub fn with_template_option(mut self, template: TemplateOption) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_computed(mut self, name: impl Into<String>, definition: Computed) -> Self {
        self.computed.insert(name.into(), definition);
        self
    }

    pub fn with_registry(mut self, name: impl Into<String>, registry: RegistryOption) -> Self {
        self.registries.insert(name.into(), registry);
        self
    }

    pub fn with_partials(self, partials: Registry) -> Self {
        self.with_registry("partials", RegistryOption::Map(partials))
    }

    pub fn with_el(mut self, selector: impl Into<String>) -> Self {
        self.el = Some(selector.into());
        self
    }

    pub fn with_adapt(mut self, adapt: Adapt) -> Self {
        self.adapt = Some(adapt);
        self
    }

    pub fn with_magic(mut self, magic: bool) -> Self {
        self.magic = Some(magic);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_isolated(mut self, isolated: bool) -> Self {
        self.isolated = Some(isolated);
        self
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = Some(append);
        self
    }

    pub fn with_no_intro(mut self, no_intro: bool) -> Self {
        self.no_intro = Some(no_intro);
        self
    }

    pub fn with_transitions_enabled(mut self, enabled: bool) -> Self {
        self.transitions_enabled = Some(enabled);
        self
    }

    pub fn with_complete(mut self, complete: impl Fn() + 'static) -> Self {
        self.complete = Some(Rc::new(complete));
        self
    }

    /// Move deprecated options onto their replacements
    pub fn migrate_deprecated(&mut self) {
        if let Some(adaptors) = self.adaptors.take() {
            tracing::warn!(
                "the `adaptors` option has been deprecated in favour of `adapt`"
            );
            self.adapt = Some(Adapt::Many(adaptors));
        }

        if let Some(events) = self.event_definitions.take() {
            tracing::warn!(
                "the `eventDefinitions` option has been deprecated in favour of `events`"
            );
            self.registries.insert("events".to_string(), events);
        }
    }

    /// Fill every plain option missing here from `defaults`
    ///
    /// Data, computed definitions and registries are left alone: they are
    /// resolved against the defaults during their own initialization step.
    pub fn merged_over(mut self, defaults: &InstanceOptions) -> Self {
        fn fill<T: Clone>(slot: &mut Option<T>, default: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(default);
            }
        }

        fill(&mut self.adapt, &defaults.adapt);
        fill(&mut self.modify_arrays, &defaults.modify_arrays);
        fill(&mut self.magic, &defaults.magic);
        fill(&mut self.twoway, &defaults.twoway);
        fill(&mut self.lazy, &defaults.lazy);
        fill(&mut self.debug, &defaults.debug);
        fill(&mut self.isolated, &defaults.isolated);
        fill(&mut self.template, &defaults.template);
        fill(&mut self.el, &defaults.el);
        fill(&mut self.append, &defaults.append);
        fill(&mut self.no_intro, &defaults.no_intro);
        fill(&mut self.transitions_enabled, &defaults.transitions_enabled);
        fill(&mut self.complete, &defaults.complete);
        fill(&mut self.preserve_whitespace, &defaults.preserve_whitespace);
        fill(&mut self.sanitize, &defaults.sanitize);
        fill(&mut self.strip_comments, &defaults.strip_comments);
        self
    }

    /// Parse options recorded on the instance
    pub fn parse_options(&self) -> ParseOptions {
        let fallback = ParseOptions::default();
        ParseOptions {
            preserve_whitespace: self
                .preserve_whitespace
                .unwrap_or(fallback.preserve_whitespace),
            sanitize: self.sanitize.unwrap_or(fallback.sanitize),
            strip_comments: self.strip_comments.unwrap_or(fallback.strip_comments),
        }
    }
}

/// Flags resolved onto an instance
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceFlags {
    pub adapt: Vec<String>,
    pub modify_arrays: bool,
    pub magic: bool,
    pub twoway: bool,
    pub lazy: bool,
    pub debug: bool,
    pub isolated: bool,
}

impl Default for InstanceFlags {
    fn default() -> Self {
        Self {
            adapt: Vec::new(),
            modify_arrays: true,
            magic: false,
            twoway: true,
            lazy: false,
            debug: false,
            isolated: false,
        }
    }
}

impl InstanceFlags {
    /// Resolve flags from merged options
    pub fn resolve(options: &InstanceOptions) -> Self {
        let fallback = Self::default();
        Self {
            adapt: options
                .adapt
                .clone()
                .map(Adapt::into_list)
                .unwrap_or(fallback.adapt),
            modify_arrays: options.modify_arrays.unwrap_or(fallback.modify_arrays),
            magic: options.magic.unwrap_or(fallback.magic),
            twoway: options.twoway.unwrap_or(fallback.twoway),
            lazy: options.lazy.unwrap_or(fallback.lazy),
            debug: options.debug.unwrap_or(fallback.debug),
            isolated: options.isolated.unwrap_or(fallback.isolated),
        }
    }
}

/// Options handed to the parser collaborator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParseOptions {
    pub preserve_whitespace: bool,
    pub sanitize: bool,
    pub strip_comments: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            preserve_whitespace: false,
            sanitize: false,
            strip_comments: true,
        }
    }
}

/// The serializable subset of [`InstanceOptions`]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlainOptions {
    #[serde(default)]
    adapt: Option<Adapt>,
    #[serde(default)]
    modify_arrays: Option<bool>,
    #[serde(default)]
    magic: Option<bool>,
    #[serde(default)]
    twoway: Option<bool>,
    #[serde(default)]
    lazy: Option<bool>,
    #[serde(default)]
    debug: Option<bool>,
    #[serde(default)]
    isolated: Option<bool>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    partials: Option<IndexMap<String, Value>>,
    #[serde(default)]
    el: Option<String>,
    #[serde(default)]
    append: Option<bool>,
    #[serde(default)]
    no_intro: Option<bool>,
    #[serde(default)]
    transitions_enabled: Option<bool>,
    #[serde(default)]
    preserve_whitespace: Option<bool>,
    #[serde(default)]
    sanitize: Option<bool>,
    #[serde(default)]
    strip_comments: Option<bool>,
    #[serde(default)]
    adaptors: Option<Vec<String>>,
}

impl From<PlainOptions> for InstanceOptions {
    fn from(plain: PlainOptions) -> Self {
        let mut options = InstanceOptions {
            adapt: plain.adapt,
            modify_arrays: plain.modify_arrays,
            magic: plain.magic,
            twoway: plain.twoway,
            lazy: plain.lazy,
            debug: plain.debug,
            isolated: plain.isolated,
            data: plain.data.map(DataOption::Value),
            template: plain
                .template
                .map(|t| TemplateOption::Source(TemplateSource::Text(t))),
            el: plain.el,
            append: plain.append,
            no_intro: plain.no_intro,
            transitions_enabled: plain.transitions_enabled,
            preserve_whitespace: plain.preserve_whitespace,
            sanitize: plain.sanitize,
            strip_comments: plain.strip_comments,
            adaptors: plain.adaptors,
            ..InstanceOptions::default()
        };
        if let Some(partials) = plain.partials {
            options
                .registries
                .insert("partials".to_string(), RegistryOption::Map(partials));
        }
        options
    }
}

//! Registries and instance data
//!
//! A registry maps names to definitions (partials, transitions, components,
//! decorators, events, adaptors, or any custom registry). Definitions are
//! opaque to the instance and stored as JSON values.
//!
//! Resolution of an option against its class default:
//!
//! | instance option | class default | result                                   |
//! |-----------------|---------------|------------------------------------------|
//! | factory         | any           | factory(data, options)                   |
//! | map / none      | factory       | default(data, options), else the option  |
//! | map / none      | map           | default extended with the option         |
//! | map / none      | none          | the option, else empty                   |

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::config::InstanceOptions;

/// Registries initialized after data, in this order
pub const REGISTRIES: [&str; 6] = [
    "partials",
    "transitions",
    "components",
    "decorators",
    "events",
    "adaptors",
];

/// Named definitions
pub type Registry = IndexMap<String, Value>;

/// Builds a registry from the instance data and options
pub type RegistryFactory = Rc<dyn Fn(&Value, &InstanceOptions) -> Option<Registry>>;

/// Builds the instance data; receives the instance's own data value (or null)
pub type DataFactory = Rc<dyn Fn(&Value, &InstanceOptions) -> Option<Value>>;

#[derive(Clone)]
pub enum RegistryOption {
    Map(Registry),
    Factory(RegistryFactory),
}

impl RegistryOption {
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&Value, &InstanceOptions) -> Option<Registry> + 'static,
    {
        RegistryOption::Factory(Rc::new(factory))
    }

    fn as_map(&self) -> Option<&Registry> {
        match self {
            RegistryOption::Map(map) => Some(map),
            RegistryOption::Factory(_) => None,
        }
    }
}

#[derive(Clone)]
pub enum DataOption {
    Value(Value),
    Factory(DataFactory),
}

impl DataOption {
    fn as_value(&self) -> Option<&Value> {
        match self {
            DataOption::Value(value) => Some(value),
            DataOption::Factory(_) => None,
        }
    }
}

/// Resolve one registry against its class default
pub fn resolve_registry(
    option: Option<&RegistryOption>,
    default: Option<&RegistryOption>,
    data: &Value,
    options: &InstanceOptions,
) -> Registry {
    if let Some(RegistryOption::Factory(factory)) = option {
        return factory(data, options).unwrap_or_default();
    }

    let own = option.and_then(RegistryOption::as_map);
    match default {
        Some(RegistryOption::Factory(factory)) => factory(data, options)
            .or_else(|| own.cloned())
            .unwrap_or_default(),
        Some(RegistryOption::Map(defaults)) => {
            let mut registry = defaults.clone();
            if let Some(own) = own {
                registry.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            registry
        }
        None => own.cloned().unwrap_or_default(),
    }
}

/// Resolve the instance data against the class default
///
/// Mapping defaults are shallow-merged under the instance mapping. The result
/// is always a value; missing data becomes an empty mapping.
pub fn resolve_data(
    option: Option<&DataOption>,
    default: Option<&DataOption>,
    options: &InstanceOptions,
) -> Value {
    let own = option.and_then(DataOption::as_value);

    let resolved = match (option, default) {
        (Some(DataOption::Factory(factory)), _) => factory(&Value::Null, options),
        (_, Some(DataOption::Factory(factory))) => {
            factory(own.unwrap_or(&Value::Null), options).or_else(|| own.cloned())
        }
        (_, Some(DataOption::Value(defaults))) => Some(match (defaults, own) {
            (Value::Object(defaults), Some(Value::Object(own))) => {
                let mut merged = defaults.clone();
                merged.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
                Value::Object(merged)
            }
            (_, Some(own)) => own.clone(),
            (defaults, None) => defaults.clone(),
        }),
        (_, None) => own.cloned(),
    };

    match resolved {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(value) => value,
    }
}

/// Add entries from `source` that `registry` does not already have
pub fn fill_gaps(registry: &mut Registry, source: Registry) {
    for (name, value) in source {
        registry.entry(name).or_insert(value);
    }
}

/// Registry names to initialize: the standard ones, then custom names from
/// either level in first-seen order
pub(crate) fn registry_names(options: &InstanceOptions, defaults: &InstanceOptions) -> Vec<String> {
    let mut names: Vec<String> = REGISTRIES.iter().map(|s| s.to_string()).collect();
    for name in options.registries.keys().chain(defaults.registries.keys()) {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

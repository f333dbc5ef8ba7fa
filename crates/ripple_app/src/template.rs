//! Template resolution
//!
//! Templates arrive as a string to parse, an already-parsed template, or a
//! factory producing either. Parsing is delegated to a [`Parser`]; a parsed
//! result bundled with partials is split into its main template and partials.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::config::{InstanceOptions, ParseOptions};
use crate::error::{InstanceError, Result};
use crate::registry::{fill_gaps, Registry};
use crate::render::Host;

/// Parses template source
pub trait Parser {
    fn parse(&self, source: &str, options: &ParseOptions) -> anyhow::Result<Parsed>;
}

/// Parser output
#[derive(Clone, Debug, PartialEq)]
pub enum Parsed {
    Template(Value),
    WithPartials {
        main: Value,
        partials: IndexMap<String, Value>,
    },
}

/// A template as given (or produced by a factory)
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateSource {
    /// Source to parse, or `#id` naming a template element on a client host
    Text(String),
    Parsed(Parsed),
}

/// Produces a template from the instance data and options
pub type TemplateFactory = Rc<dyn Fn(&Value, &InstanceOptions) -> Option<TemplateSource>>;

#[derive(Clone)]
pub enum TemplateOption {
    Source(TemplateSource),
    Factory(TemplateFactory),
}

impl TemplateOption {
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&Value, &InstanceOptions) -> Option<TemplateSource> + 'static,
    {
        TemplateOption::Factory(Rc::new(factory))
    }
}

/// The template stored on an instance
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedTemplate {
    Ast(Value),
    /// A template that is a single literal string
    Html(String),
}

impl ResolvedTemplate {
    fn from_main(main: Value) -> Self {
        match main {
            Value::Array(mut items) if items.len() == 1 && items[0].is_string() => {
                match items.pop() {
                    Some(Value::String(html)) => ResolvedTemplate::Html(html),
                    _ => ResolvedTemplate::Ast(Value::Array(items)),
                }
            }
            other => ResolvedTemplate::Ast(other),
        }
    }
}

/// Choose the template: an instance factory, then a class-default factory
/// (falling back to the option), then the option itself
pub(crate) fn select(
    options: &InstanceOptions,
    defaults: &InstanceOptions,
    data: &Value,
) -> Option<TemplateSource> {
    let own = match &options.template {
        Some(TemplateOption::Factory(factory)) => return factory(data, options),
        Some(TemplateOption::Source(source)) => Some(source.clone()),
        None => None,
    };

    match &defaults.template {
        Some(TemplateOption::Factory(factory)) => factory(data, options).or(own),
        _ => own,
    }
}

/// Parse (if necessary) and unpack a template, merging bundled partials into
/// `partials` without overwriting existing entries
pub(crate) fn resolve(
    source: Option<TemplateSource>,
    parser: Option<&dyn Parser>,
    host: &dyn Host,
    parse_options: &ParseOptions,
    partials: &mut Registry,
) -> Result<Option<ResolvedTemplate>> {
    let parsed = match source {
        None => return Ok(None),
        Some(TemplateSource::Parsed(parsed)) => parsed,
        Some(TemplateSource::Text(text)) => {
            let parser = parser.ok_or(InstanceError::MissingParser)?;
            let source = match text.strip_prefix('#') {
                Some(id) if host.is_client() => host
                    .template_source(id)
                    .ok_or_else(|| InstanceError::TemplateElementNotFound(text.clone()))?,
                _ => text,
            };
            parser.parse(&source, parse_options)?
        }
    };

    let main = match parsed {
        Parsed::Template(main) => main,
        Parsed::WithPartials {
            main,
            partials: bundled,
        } => {
            tracing::debug!("template carries {} partials", bundled.len());
            fill_gaps(partials, bundled);
            main
        }
    };

    Ok(Some(ResolvedTemplate::from_main(main)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MountTarget;
    use serde_json::json;
    use std::cell::RefCell;

    struct EchoParser {
        seen: RefCell<Vec<String>>,
    }

    impl Parser for EchoParser {
        fn parse(&self, source: &str, _options: &ParseOptions) -> anyhow::Result<Parsed> {
            self.seen.borrow_mut().push(source.to_string());
            if source.is_empty() {
                anyhow::bail!("empty template");
            }
            Ok(Parsed::Template(json!([source])))
        }
    }

    struct ScriptHost {
        client: bool,
    }

    impl Host for ScriptHost {
        fn find_target(&self, _selector: &str) -> Option<MountTarget> {
            None
        }

        fn is_client(&self) -> bool {
            self.client
        }

        fn template_source(&self, id: &str) -> Option<String> {
            (id == "tpl").then(|| "<p>{{msg}}</p>".to_string())
        }
    }

    fn parser() -> EchoParser {
        EchoParser {
            seen: RefCell::new(Vec::new()),
        }
    }

    fn text(s: &str) -> Option<TemplateSource> {
        Some(TemplateSource::Text(s.to_string()))
    }

    #[test]
    fn test_string_requires_parser() {
        let err = resolve(
            text("{{x}}"),
            None,
            &ScriptHost { client: false },
            &ParseOptions::default(),
            &mut Registry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, InstanceError::MissingParser));
    }

    #[test]
    fn test_single_string_collapses() {
        let parser = parser();
        let resolved = resolve(
            text("<b>hi</b>"),
            Some(&parser),
            &ScriptHost { client: false },
            &ParseOptions::default(),
            &mut Registry::new(),
        )
        .unwrap();
        assert_eq!(resolved, Some(ResolvedTemplate::Html("<b>hi</b>".into())));
    }

    #[test]
    fn test_template_element_reference() {
        let parser = parser();
        let client = ScriptHost { client: true };
        resolve(
            text("#tpl"),
            Some(&parser),
            &client,
            &ParseOptions::default(),
            &mut Registry::new(),
        )
        .unwrap();
        assert_eq!(parser.seen.borrow().as_slice(), ["<p>{{msg}}</p>"]);

        let err = resolve(
            text("#missing"),
            Some(&parser),
            &client,
            &ParseOptions::default(),
            &mut Registry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, InstanceError::TemplateElementNotFound(id) if id == "#missing"));

        // off the client, `#` is just text
        resolve(
            text("#tpl"),
            Some(&parser),
            &ScriptHost { client: false },
            &ParseOptions::default(),
            &mut Registry::new(),
        )
        .unwrap();
        assert_eq!(parser.seen.borrow().last().map(String::as_str), Some("#tpl"));
    }

    #[test]
    fn test_parser_failure_is_reported() {
        let parser = parser();
        let err = resolve(
            text(""),
            Some(&parser),
            &ScriptHost { client: false },
            &ParseOptions::default(),
            &mut Registry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, InstanceError::Collaborator(msg) if msg.contains("empty template")));
    }

    #[test]
    fn test_bundled_partials_fill_gaps() {
        let mut partials = Registry::new();
        partials.insert("row".into(), json!("existing"));
        let mut bundled = IndexMap::new();
        bundled.insert("row".to_string(), json!(["parsed row"]));
        bundled.insert("cell".to_string(), json!(["parsed cell"]));

        let resolved = resolve(
            Some(TemplateSource::Parsed(Parsed::WithPartials {
                main: json!([{ "t": 7, "e": "ul" }]),
                partials: bundled,
            })),
            None,
            &ScriptHost { client: false },
            &ParseOptions::default(),
            &mut partials,
        )
        .unwrap();

        assert_eq!(resolved, Some(ResolvedTemplate::Ast(json!([{ "t": 7, "e": "ul" }]))));
        assert_eq!(partials["row"], json!("existing"));
        assert_eq!(partials["cell"], json!(["parsed cell"]));
    }

    #[test]
    fn test_selection_precedence() {
        let data = json!({ "n": 2 });
        let defaults = InstanceOptions::new().with_template_option(TemplateOption::factory(
            |data, _| {
                (data["n"] == json!(2)).then(|| TemplateSource::Text("from default".into()))
            },
        ));

        let own = InstanceOptions::new().with_template("from options");
        assert_eq!(select(&own, &defaults, &data), text("from default"));
        assert_eq!(
            select(&own, &defaults, &json!({ "n": 3 })),
            text("from options")
        );

        let factory = InstanceOptions::new().with_template_option(TemplateOption::factory(
            |_, _| Some(TemplateSource::Text("from instance factory".into())),
        ));
        assert_eq!(
            select(&factory, &defaults, &data),
            text("from instance factory")
        );
    }
}

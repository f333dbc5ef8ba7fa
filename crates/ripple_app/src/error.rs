//! Error types for ripple_app

use ripple_core::CoreError;
use thiserror::Error;

/// Errors raised while initializing or driving an instance
#[derive(Error, Debug)]
pub enum InstanceError {
    /// Magic mode was requested on a host without property accessors
    #[error("getters and setters (magic mode) are not supported by this host")]
    UnsupportedMode,

    /// The mount target could not be resolved (debug mode only)
    #[error("could not find container element `{0}`")]
    TargetNotFound(String),

    /// A string template was supplied but no parser is available
    #[error("missing parser: string templates cannot be used without one")]
    MissingParser,

    /// A `#id` template reference did not resolve to a template element
    #[error("could not find template element `{0}`")]
    TemplateElementNotFound(String),

    /// Options could not be read from a document
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Viewmodel, runloop and array errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A parser or renderer failed
    #[error("{0}")]
    Collaborator(String),
}

impl From<anyhow::Error> for InstanceError {
    fn from(err: anyhow::Error) -> Self {
        InstanceError::Collaborator(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for InstanceError {
    fn from(err: serde_json::Error) -> Self {
        InstanceError::InvalidOptions(err.to_string())
    }
}

impl From<toml::de::Error> for InstanceError {
    fn from(err: toml::de::Error) -> Self {
        InstanceError::InvalidOptions(err.to_string())
    }
}

/// Result type for ripple_app operations
pub type Result<T> = std::result::Result<T, InstanceError>;

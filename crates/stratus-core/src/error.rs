//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating a cluster description.
///
/// All of these are fatal: they are reported before any provider call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("name '{name}' in {context} must not contain '{separator}'")]
    Separator {
        name: String,
        context: String,
        separator: char,
    },

    #[error("duplicate node type: {0}")]
    DuplicateNodeType(String),

    #[error("node type '{node_type}' references undeclared {kind} '{name}'")]
    UnknownReference {
        node_type: String,
        kind: &'static str,
        name: String,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

//! Operation error types.

use thiserror::Error;

use stratus_core::ConfigError;
use stratus_health::ProbeError;
use stratus_provider::ProviderError;

/// Errors that can end an operation.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("missing [{0}] section in configuration")]
    MissingSection(&'static str),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} on {node} exited with {status}: {stderr}")]
    Remote {
        program: &'static str,
        node: String,
        status: String,
        stderr: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type OpsResult<T> = Result<T, OpsError>;

use thiserror::Error;

/// Errors raised by provider clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("http transport error: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no '{service}' endpoint in service catalog")]
    Catalog { service: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("pull of '{image}' failed: {message}")]
    Pull { image: String, message: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

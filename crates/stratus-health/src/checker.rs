//! Reachability probe logic.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;
use thiserror::Error;
use tracing::debug;

use stratus_core::config::{TestCase, parse_duration};
use stratus_provider::ProviderError;
use stratus_provider::http::{ApiRequest, ApiResponse, HttpClient, read_response, url_host};

/// Result of one test whose request completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Passed { status: u16 },
    Mismatch { status: u16, excerpt: String },
}

impl ProbeOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ProbeOutcome::Passed { .. })
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: ProviderError,
    },

    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("invalid timeout '{0}'")]
    InvalidTimeout(String),
}

/// URL of `test` against the node at `address`.
pub fn test_url(address: &str, test: &TestCase) -> String {
    let path = if test.path.starts_with('/') {
        test.path.clone()
    } else {
        format!("/{}", test.path)
    };
    let mut url = format!(
        "{}://{}:{}{path}",
        test.protocol.scheme(),
        url_host(address),
        test.port
    );
    if !test.query.is_empty() {
        let query: Vec<String> = test
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        url.push('?');
        url.push_str(&query.join("&"));
    }
    url
}

/// Whether `body` satisfies the expectations. The prefix is checked
/// first; with no expectation at all every body passes.
pub fn check_body(body: &str, should_start_with: Option<&str>, should_contain: Option<&str>) -> bool {
    if should_start_with.is_some_and(|prefix| body.starts_with(prefix)) {
        return true;
    }
    if should_contain.is_some_and(|needle| body.contains(needle)) {
        return true;
    }
    should_start_with.is_none() && should_contain.is_none()
}

async fn fetch(http: &HttpClient, request: ApiRequest) -> Result<ApiResponse, ProviderError> {
    let response = http.send(request).await?;
    read_response(response).await
}

/// Run `test` against the node at `address`.
pub async fn probe(http: &HttpClient, address: &str, test: &TestCase) -> Result<ProbeOutcome, ProbeError> {
    let url = test_url(address, test);
    let mut request = ApiRequest::get(url.clone());
    if let Some(auth) = &test.auth {
        let credentials = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
        request = request.header(AUTHORIZATION, format!("Basic {credentials}"));
    }

    let exchange = fetch(http, request);
    let response = match &test.timeout {
        Some(raw) => {
            let after = parse_duration(raw).ok_or_else(|| ProbeError::InvalidTimeout(raw.clone()))?;
            tokio::time::timeout(after, exchange)
                .await
                .map_err(|_| ProbeError::Timeout {
                    url: url.clone(),
                    after,
                })?
        }
        None => exchange.await,
    }
    .map_err(|source| ProbeError::Request {
        url: url.clone(),
        source,
    })?;

    let status = response.status.as_u16();
    let body = String::from_utf8_lossy(&response.body);
    debug!(%url, status, bytes = response.body.len(), "probe response");

    if check_body(
        &body,
        test.should_start_with.as_deref(),
        test.should_contain.as_deref(),
    ) {
        Ok(ProbeOutcome::Passed { status })
    } else {
        Ok(ProbeOutcome::Mismatch {
            status,
            excerpt: body.chars().take(120).collect(),
        })
    }
}

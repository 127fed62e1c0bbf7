//! Minimal HTTP/1.1 client used by every provider.
//!
//! One connection per request: `TcpStream` (optionally wrapped in
//! rustls) handed to `hyper::client::conn::http1`. Provider calls are few
//! and short, so there is no pooling.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

const AGENT: &str = concat!("stratus/", env!("CARGO_PKG_VERSION"));

/// Client-side TLS settings.
#[derive(Clone)]
pub struct TlsConfig {
    pub client_config: Arc<rustls::ClientConfig>,
}

impl TlsConfig {
    /// Verify servers against the Mozilla root store.
    pub fn with_webpki_roots() -> ProviderResult<Self> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| ProviderError::Tls(format!("protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }
}

impl From<Arc<rustls::ClientConfig>> for TlsConfig {
    fn from(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self { client_config }
    }
}

/// A request to send.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(HeaderName, String)>,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Set a JSON body and the matching content type.
    pub fn json<T: Serialize>(mut self, body: &T) -> ProviderResult<Self> {
        self.body = Bytes::from(serde_json::to_vec(body)?);
        Ok(self.header(CONTENT_TYPE, "application/json"))
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> ProviderResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
pub struct HttpClient {
    tls: TlsConfig,
}

impl HttpClient {
    pub fn new(tls: TlsConfig) -> Self {
        Self { tls }
    }

    pub fn with_webpki_roots() -> ProviderResult<Self> {
        Ok(Self::new(TlsConfig::with_webpki_roots()?))
    }

    /// Send `request` and return the response with its body unread.
    pub async fn send(&self, request: ApiRequest) -> ProviderResult<hyper::Response<Incoming>> {
        let uri: Uri = request
            .url
            .parse()
            .map_err(|_| ProviderError::InvalidUrl(request.url.clone()))?;
        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(ProviderError::InvalidUrl(request.url.clone())),
        };
        let host = uri
            .host()
            .ok_or_else(|| ProviderError::InvalidUrl(request.url.clone()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| host.clone());

        let mut sender = self.connect(&host, port, https).await?;

        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(path)
            .header(HOST, authority)
            .header(USER_AGENT, AGENT);
        for (name, value) in &request.headers {
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProviderError::Request(http::Error::from(e)))?;
            builder = builder.header(name, value);
        }
        let req = builder.body(Full::new(request.body.clone()))?;

        debug!(method = %request.method, url = %request.url, "sending request");
        Ok(sender.send_request(req).await?)
    }

    /// Send `request`, read the whole body, and fail on non-2xx.
    pub async fn execute(&self, request: ApiRequest) -> ProviderResult<ApiResponse> {
        let method = request.method.to_string();
        let url = request.url.clone();
        let response = self.send(request).await?;
        let response = read_response(response).await?;
        if !response.status.is_success() {
            return Err(status_error(&method, &url, &response));
        }
        Ok(response)
    }

    async fn connect(
        &self,
        host: &str,
        port: u16,
        https: bool,
    ) -> ProviderResult<SendRequest<Full<Bytes>>> {
        let address = format!("{host}:{port}");
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ProviderError::Connect {
                address: address.clone(),
                source,
            })?;

        if !https {
            return handshake(stream).await;
        }

        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| ProviderError::Tls(format!("invalid server name '{host}': {e}")))?;
        let connector = tokio_rustls::TlsConnector::from(Arc::clone(&self.tls.client_config));
        let stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|source| ProviderError::Connect { address, source })?;
        handshake(stream).await
    }
}

async fn handshake<S>(stream: S) -> ProviderResult<SendRequest<Full<Bytes>>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "connection closed with error");
        }
    });
    Ok(sender)
}

pub async fn read_response(response: hyper::Response<Incoming>) -> ProviderResult<ApiResponse> {
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(ApiResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

pub fn status_error(method: &str, url: &str, response: &ApiResponse) -> ProviderError {
    ProviderError::Status {
        method: method.to_string(),
        url: url.to_string(),
        status: response.status.as_u16(),
        body: String::from_utf8_lossy(&response.body).trim().to_string(),
    }
}

/// `host` ready to be put in a URL authority.
pub fn url_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::{json_ok, response, serve};
    use super::*;

    fn client() -> HttpClient {
        HttpClient::with_webpki_roots().unwrap()
    }

    #[tokio::test]
    async fn execute_sends_origin_form_request_with_json_body() {
        let (addr, requests) = serve(vec![json_ok(r#"{"ok":true}"#)]).await;

        let request = ApiRequest::post(format!("http://{addr}/v2/things?x=1"))
            .header(HeaderName::from_static("x-auth-token"), "tok")
            .json(&serde_json::json!({"name": "a"}))
            .unwrap();
        let response = client().execute(request).await.unwrap();

        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["ok"], true);

        let raw = &requests.await.unwrap()[0];
        assert!(raw.starts_with("POST /v2/things?x=1 HTTP/1.1\r\n"), "{raw}");
        assert!(raw.to_ascii_lowercase().contains("x-auth-token: tok"));
        assert!(raw.ends_with(r#"{"name":"a"}"#));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error_with_body() {
        let (addr, _requests) = serve(vec![response(404, "text/plain", "no such server")]).await;

        let err = client()
            .execute(ApiRequest::delete(format!("http://{addr}/servers/1")))
            .await
            .unwrap_err();
        match err {
            ProviderError::Status { status, body, method, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such server");
                assert_eq!(method, "DELETE");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rejects_unknown_scheme() {
        let err = client()
            .execute(ApiRequest::get("ftp://example.org/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client()
            .execute(ApiRequest::get(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Connect { .. }));
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(url_host("10.0.0.1"), "10.0.0.1");
        assert_eq!(url_host("fd00::1"), "[fd00::1]");
        assert_eq!(url_host("[fd00::1]"), "[fd00::1]");
    }
}

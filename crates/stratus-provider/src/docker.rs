//! Docker Engine API client, one endpoint per node.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use futures_util::StreamExt;
use http::StatusCode;
use http::header::HeaderName;
use http_body_util::BodyExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use stratus_core::config::{DockerConfig, Protocol, RegistryAuth};
use stratus_core::{CreateRequest, LiveContainer, LiveImage, NodeRecord};

use crate::error::{ProviderError, ProviderResult};
use crate::http::{ApiRequest, HttpClient, read_response, status_error, url_host};
use crate::{ContainerRuntime, PullStream};

const REGISTRY_AUTH: HeaderName = HeaderName::from_static("x-registry-auth");

#[derive(Clone)]
pub struct DockerEngine {
    http: HttpClient,
    port: u16,
    protocol: Protocol,
}

impl DockerEngine {
    pub fn new(http: HttpClient, config: &DockerConfig) -> Self {
        Self {
            http,
            port: config.port,
            protocol: config.protocol,
        }
    }

    fn url(&self, node: &NodeRecord, path: &str) -> String {
        format!(
            "{}://{}:{}{path}",
            self.protocol.scheme(),
            url_host(&node.address),
            self.port
        )
    }

    /// POST that treats `304 Not Modified` (already in that state) as success.
    async fn post_idempotent(&self, url: String) -> ProviderResult<()> {
        let response = read_response(self.http.send(ApiRequest::post(url.clone())).await?).await?;
        if response.status.is_success() || response.status == StatusCode::NOT_MODIFIED {
            Ok(())
        } else {
            Err(status_error("POST", &url, &response))
        }
    }
}

/// `X-Registry-Auth` header value.
fn registry_auth_header(auth: &RegistryAuth) -> ProviderResult<String> {
    let mut body = json!({ "username": auth.username, "password": auth.password });
    if let Some(object) = body.as_object_mut() {
        if let Some(email) = &auth.email {
            object.insert("email".to_string(), json!(email));
        }
        if let Some(server) = &auth.serveraddress {
            object.insert("serveraddress".to_string(), json!(server));
        }
    }
    Ok(URL_SAFE.encode(serde_json::to_vec(&body)?))
}

/// Create body: the configured create options with `Image` and `Cmd`.
fn create_body(request: &CreateRequest) -> Value {
    let mut body = match &request.create_options {
        Value::Object(object) => Value::Object(object.clone()),
        _ => json!({}),
    };
    if let Some(object) = body.as_object_mut() {
        object.insert("Image".to_string(), json!(request.image));
        if !request.cmd.is_empty() {
            object.insert("Cmd".to_string(), json!(request.cmd));
        }
    }
    body
}

fn has_fields(value: &Value) -> bool {
    value.as_object().is_some_and(|o| !o.is_empty())
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageSummary {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Created {
    id: String,
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn pull_image(
        &self,
        node: &NodeRecord,
        repo: &str,
        auth: Option<&RegistryAuth>,
    ) -> ProviderResult<PullStream> {
        let url = self.url(
            node,
            &format!("/images/create?fromImage={}", urlencoding::encode(repo)),
        );
        let mut request = ApiRequest::post(url.clone());
        if let Some(auth) = auth {
            request = request.header(REGISTRY_AUTH, registry_auth_header(auth)?);
        }

        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            let response = read_response(response).await?;
            return Err(status_error("POST", &url, &response));
        }
        debug!(node = %node.name, repo, "pull started");
        let stream = response
            .into_body()
            .into_data_stream()
            .map(|chunk| chunk.map_err(ProviderError::from));
        Ok(Box::pin(stream))
    }

    async fn list_containers(&self, node: &NodeRecord) -> ProviderResult<Vec<LiveContainer>> {
        let list: Vec<ContainerSummary> = self
            .http
            .execute(ApiRequest::get(self.url(node, "/containers/json?all=1")))
            .await?
            .json()?;
        Ok(list
            .into_iter()
            .map(|c| LiveContainer {
                id: c.id,
                image: c.image,
                status: c.status,
                names: c.names,
            })
            .collect())
    }

    async fn create_and_start(
        &self,
        node: &NodeRecord,
        request: &CreateRequest,
    ) -> ProviderResult<String> {
        let created: Created = self
            .http
            .execute(ApiRequest::post(self.url(node, "/containers/create")).json(&create_body(request))?)
            .await?
            .json()?;
        debug!(node = %node.name, id = %created.id, image = %request.image, "container created");

        let start_url = self.url(node, &format!("/containers/{}/start", created.id));
        if has_fields(&request.start_options) {
            self.http
                .execute(ApiRequest::post(start_url).json(&request.start_options)?)
                .await?;
        } else {
            self.post_idempotent(start_url).await?;
        }
        Ok(created.id)
    }

    async fn start(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()> {
        self.post_idempotent(self.url(node, &format!("/containers/{container_id}/start")))
            .await
    }

    async fn stop(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()> {
        self.post_idempotent(self.url(node, &format!("/containers/{container_id}/stop")))
            .await
    }

    async fn remove(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()> {
        self.http
            .execute(ApiRequest::delete(
                self.url(node, &format!("/containers/{container_id}")),
            ))
            .await?;
        Ok(())
    }

    async fn list_images(&self, node: &NodeRecord) -> ProviderResult<Vec<LiveImage>> {
        let list: Vec<ImageSummary> = self
            .http
            .execute(ApiRequest::get(self.url(node, "/images/json")))
            .await?
            .json()?;
        Ok(list
            .into_iter()
            .map(|i| LiveImage {
                id: i.id,
                repo_tags: i.repo_tags.unwrap_or_default(),
            })
            .collect())
    }

    async fn remove_image(&self, node: &NodeRecord, image_id: &str) -> ProviderResult<()> {
        self.http
            .execute(ApiRequest::delete(self.url(node, &format!("/images/{image_id}"))))
            .await?;
        Ok(())
    }
}

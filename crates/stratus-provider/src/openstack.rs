//! OpenStack client: Keystone v3, Nova, Neutron and Cinder.
//!
//! One token is obtained per invocation and shared by the compute,
//! network and block-storage implementations.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::HeaderName;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use stratus_core::config::ProviderConfig;
use stratus_core::{
    InstanceSpec, LiveInstance, LiveRule, LiveSecurityGroup, LiveVolume, SecurityRuleRequest,
    VolumeSpec,
};

use crate::error::{ProviderError, ProviderResult};
use crate::http::{ApiRequest, HttpClient};
use crate::{BlockStorageProvider, ComputeProvider, CreatedVolume, NetworkProvider};

const AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");
const SUBJECT_TOKEN: &str = "x-subject-token";

/// Catalog types tried, in order, for block storage.
const VOLUME_SERVICES: [&str; 3] = ["volumev3", "block-storage", "volumev2"];

/// Endpoints resolved from the service catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub compute: String,
    pub network: String,
    pub volume: Option<String>,
}

/// An authenticated OpenStack session.
#[derive(Clone)]
pub struct OpenStack {
    http: HttpClient,
    token: String,
    endpoints: Endpoints,
    /// Network whose address identifies a server; first IPv4 otherwise.
    network: Option<String>,
}

impl OpenStack {
    /// Authenticate with a password and resolve the service catalog.
    pub async fn authenticate(config: &ProviderConfig, http: HttpClient) -> ProviderResult<Self> {
        let password = config
            .password
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("no password configured".to_string()))?;

        let url = format!("{}/auth/tokens", config.auth_url.trim_end_matches('/'));
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": config.username,
                            "domain": { "name": config.user_domain },
                            "password": password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": config.project_name,
                        "domain": { "name": config.project_domain },
                    }
                }
            }
        });

        let response = http
            .execute(ApiRequest::post(url).json(&body)?)
            .await
            .map_err(|e| match e {
                ProviderError::Status { status, body, .. } => {
                    ProviderError::Auth(format!("keystone returned {status}: {body}"))
                }
                other => other,
            })?;
        let token = response
            .header(SUBJECT_TOKEN)
            .ok_or_else(|| ProviderError::Auth("no subject token in response".to_string()))?
            .to_string();
        let auth: TokenResponse = response.json()?;
        let endpoints = resolve_endpoints(&auth.token.catalog, config.region.as_deref())?;

        info!(
            user = %config.username,
            project = %config.project_name,
            compute = %endpoints.compute,
            "authenticated"
        );
        Ok(Self::with_token(http, token, endpoints, config.network.clone()))
    }

    pub fn with_token(
        http: HttpClient,
        token: String,
        endpoints: Endpoints,
        network: Option<String>,
    ) -> Self {
        Self {
            http,
            token,
            endpoints,
            network,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn compute_url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoints.compute)
    }

    fn network_url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoints.network)
    }

    fn volume_url(&self, path: &str) -> ProviderResult<String> {
        match &self.endpoints.volume {
            Some(base) => Ok(format!("{base}{path}")),
            None => Err(ProviderError::Catalog {
                service: VOLUME_SERVICES[0].to_string(),
            }),
        }
    }

    fn authed(&self, request: ApiRequest) -> ApiRequest {
        request.header(AUTH_TOKEN, self.token.clone())
    }

    async fn call(&self, request: ApiRequest) -> ProviderResult<crate::http::ApiResponse> {
        self.http.execute(self.authed(request)).await
    }
}

// ── Keystone ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
    token: Token,
}

#[derive(Deserialize)]
struct Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    url: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
}

fn resolve_endpoints(catalog: &[CatalogEntry], region: Option<&str>) -> ProviderResult<Endpoints> {
    let compute = public_url(catalog, "compute", region).ok_or_else(|| ProviderError::Catalog {
        service: "compute".to_string(),
    })?;
    let network = public_url(catalog, "network", region).ok_or_else(|| ProviderError::Catalog {
        service: "network".to_string(),
    })?;
    let volume = VOLUME_SERVICES
        .iter()
        .find_map(|service| public_url(catalog, service, region));

    Ok(Endpoints {
        compute,
        network: with_network_version(&network),
        volume,
    })
}

fn public_url(catalog: &[CatalogEntry], service: &str, region: Option<&str>) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == "public"
                && region.is_none_or(|r| {
                    endpoint.region.as_deref() == Some(r) || endpoint.region_id.as_deref() == Some(r)
                })
        })
        .map(|endpoint| endpoint.url.trim_end_matches('/').to_string())
}

/// Neutron's catalog URL usually lacks the API version.
fn with_network_version(url: &str) -> String {
    if url.ends_with("/v2.0") {
        url.to_string()
    } else {
        format!("{url}/v2.0")
    }
}

// ── Nova ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ServerList {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct ServerCreated {
    server: CreatedServer,
}

#[derive(Deserialize)]
struct CreatedServer {
    id: String,
}

#[derive(Deserialize)]
struct Server {
    id: String,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    addresses: Map<String, Value>,
}

#[derive(Deserialize)]
struct ServerAddress {
    addr: String,
    #[serde(default)]
    version: u8,
}

/// Address of a server: the first IPv4 on `network` when configured,
/// otherwise the first IPv4 of any network.
fn server_address(addresses: &Map<String, Value>, network: Option<&str>) -> String {
    let first_v4 = |value: &Value| -> Option<String> {
        let list: Vec<ServerAddress> = serde_json::from_value(value.clone()).ok()?;
        list.into_iter().find(|a| a.version == 4).map(|a| a.addr)
    };

    if let Some(address) = network.and_then(|n| addresses.get(n)).and_then(first_v4) {
        return address;
    }
    addresses.values().find_map(first_v4).unwrap_or_default()
}

#[async_trait]
impl ComputeProvider for OpenStack {
    async fn list_instances(&self) -> ProviderResult<Vec<LiveInstance>> {
        let list: ServerList = self
            .call(ApiRequest::get(self.compute_url("/servers/detail")))
            .await?
            .json()?;
        let network = self.network.as_deref();
        Ok(list
            .servers
            .into_iter()
            .map(|s| LiveInstance {
                address: server_address(&s.addresses, network),
                id: s.id,
                name: s.name,
                status: s.status,
            })
            .collect())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> ProviderResult<LiveInstance> {
        let mut server = json!({
            "name": spec.name,
            "imageRef": spec.image_ref,
            "flavorRef": spec.flavor_ref,
            "security_groups": spec
                .security_groups
                .iter()
                .map(|name| json!({ "name": name }))
                .collect::<Vec<_>>(),
        });
        if let Some(object) = server.as_object_mut() {
            if let Some(key_name) = &spec.key_name {
                object.insert("key_name".to_string(), json!(key_name));
            }
            if let Some(user_data) = &spec.user_data {
                object.insert("user_data".to_string(), json!(STANDARD.encode(user_data)));
            }
            if let Some(zone) = &spec.availability_zone {
                object.insert("availability_zone".to_string(), json!(zone));
            }
        }

        let created: ServerCreated = self
            .call(ApiRequest::post(self.compute_url("/servers")).json(&json!({ "server": server }))?)
            .await?
            .json()?;
        debug!(name = %spec.name, id = %created.server.id, "server created");
        Ok(LiveInstance {
            id: created.server.id,
            name: spec.name.clone(),
            address: String::new(),
            status: "BUILD".to_string(),
        })
    }

    async fn destroy_instance(&self, id: &str) -> ProviderResult<()> {
        self.call(ApiRequest::delete(self.compute_url(&format!("/servers/{id}"))))
            .await?;
        Ok(())
    }

    async fn attach_volume(&self, node_id: &str, volume_id: &str) -> ProviderResult<()> {
        let url = self.compute_url(&format!("/servers/{node_id}/os-volume_attachments"));
        let body = json!({ "volumeAttachment": { "volumeId": volume_id } });
        self.call(ApiRequest::post(url).json(&body)?).await?;
        Ok(())
    }

    async fn detach_volume(&self, node_id: &str, volume_id: &str) -> ProviderResult<()> {
        let url = self.compute_url(&format!(
            "/servers/{node_id}/os-volume_attachments/{volume_id}"
        ));
        self.call(ApiRequest::delete(url)).await?;
        Ok(())
    }
}

// ── Neutron ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GroupList {
    security_groups: Vec<Group>,
}

#[derive(Deserialize)]
struct GroupCreated {
    security_group: Group,
}

#[derive(Deserialize)]
struct Group {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    security_group_rules: Vec<GroupRule>,
}

#[derive(Deserialize)]
struct GroupRule {
    id: String,
    direction: String,
    #[serde(default)]
    ethertype: String,
    protocol: Option<String>,
    port_range_min: Option<u16>,
    port_range_max: Option<u16>,
    remote_ip_prefix: Option<String>,
}

#[async_trait]
impl NetworkProvider for OpenStack {
    async fn list_security_groups(&self) -> ProviderResult<Vec<LiveSecurityGroup>> {
        let list: GroupList = self
            .call(ApiRequest::get(self.network_url("/security-groups")))
            .await?
            .json()?;
        Ok(list
            .security_groups
            .into_iter()
            .map(|g| LiveSecurityGroup {
                id: g.id,
                name: g.name,
                description: g.description,
                rules: g
                    .security_group_rules
                    .into_iter()
                    .map(|r| LiveRule {
                        id: r.id,
                        direction: r.direction,
                        ethertype: r.ethertype,
                        protocol: r.protocol,
                        port_range_min: r.port_range_min,
                        port_range_max: r.port_range_max,
                        remote_ip_prefix: r.remote_ip_prefix,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> ProviderResult<String> {
        let body = json!({ "security_group": { "name": name, "description": description } });
        let created: GroupCreated = self
            .call(ApiRequest::post(self.network_url("/security-groups")).json(&body)?)
            .await?
            .json()?;
        Ok(created.security_group.id)
    }

    async fn destroy_security_group(&self, id: &str) -> ProviderResult<()> {
        self.call(ApiRequest::delete(
            self.network_url(&format!("/security-groups/{id}")),
        ))
        .await?;
        Ok(())
    }

    async fn create_security_group_rule(&self, rule: &SecurityRuleRequest) -> ProviderResult<()> {
        let body = json!({
            "security_group_rule": {
                "security_group_id": rule.security_group_id,
                "direction": rule.direction,
                "ethertype": rule.ethertype,
                "protocol": rule.protocol,
                "port_range_min": rule.port_range_min,
                "port_range_max": rule.port_range_max,
                "remote_ip_prefix": rule.remote_ip_prefix,
            }
        });
        self.call(ApiRequest::post(self.network_url("/security-group-rules")).json(&body)?)
            .await?;
        Ok(())
    }
}

// ── Cinder ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct VolumeList {
    volumes: Vec<Volume>,
}

#[derive(Deserialize)]
struct VolumeCreated {
    volume: Volume,
}

#[derive(Deserialize)]
struct Volume {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    size: u32,
    #[serde(default)]
    attachments: Vec<VolumeAttachment>,
}

#[derive(Deserialize)]
struct VolumeAttachment {
    server_id: String,
}

#[async_trait]
impl BlockStorageProvider for OpenStack {
    async fn create_volume(&self, spec: &VolumeSpec) -> ProviderResult<CreatedVolume> {
        let mut volume = json!({ "name": spec.name, "size": spec.size });
        if let Some(object) = volume.as_object_mut() {
            if let Some(volume_type) = &spec.volume_type {
                object.insert("volume_type".to_string(), json!(volume_type));
            }
            if let Some(description) = &spec.description {
                object.insert("description".to_string(), json!(description));
            }
            if let Some(zone) = &spec.availability_zone {
                object.insert("availability_zone".to_string(), json!(zone));
            }
        }

        let created: VolumeCreated = self
            .call(ApiRequest::post(self.volume_url("/volumes")?).json(&json!({ "volume": volume }))?)
            .await?
            .json()?;
        Ok(CreatedVolume {
            id: created.volume.id,
            name: created.volume.name.unwrap_or_else(|| spec.name.clone()),
        })
    }

    async fn list_volumes(&self) -> ProviderResult<Vec<LiveVolume>> {
        let list: VolumeList = self
            .call(ApiRequest::get(self.volume_url("/volumes/detail")?))
            .await?
            .json()?;
        Ok(list
            .volumes
            .into_iter()
            .map(|v| LiveVolume {
                id: v.id,
                name: v.name.unwrap_or_default(),
                status: v.status,
                size: v.size,
                attached_to: v.attachments.into_iter().map(|a| a.server_id).collect(),
            })
            .collect())
    }

    async fn destroy_volume(&self, id: &str) -> ProviderResult<()> {
        self.call(ApiRequest::delete(self.volume_url(&format!("/volumes/{id}"))?))
            .await?;
        Ok(())
    }
}

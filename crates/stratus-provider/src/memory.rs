//! In-memory provider for tests.
//!
//! Implements every provider trait over one shared state and records each
//! call as a short string (`"create_instance web-1"`), so tests can
//! assert what an operation did. Failures are injected per call string.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use stratus_core::config::RegistryAuth;
use stratus_core::{
    CreateRequest, InstanceSpec, LiveContainer, LiveImage, LiveInstance, LiveRule,
    LiveSecurityGroup, LiveVolume, NodeRecord, SecurityRuleRequest, VolumeSpec,
};

use crate::error::{ProviderError, ProviderResult};
use crate::{
    BlockStorageProvider, ComputeProvider, ContainerRuntime, CreatedVolume, NetworkProvider,
    PullStream,
};

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    instances: Vec<LiveInstance>,
    groups: Vec<LiveSecurityGroup>,
    volumes: Vec<LiveVolume>,
    /// Keyed by node name.
    containers: BTreeMap<String, Vec<LiveContainer>>,
    images: BTreeMap<String, Vec<LiveImage>>,
    created: Vec<(String, CreateRequest)>,
    pull_chunks: Vec<Bytes>,
    calls: Vec<String>,
    fail: HashSet<String>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// A fake cloud and container runtime.
#[derive(Debug, Default)]
pub struct MemoryCloud {
    state: Mutex<State>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A test that panicked while holding the lock has already failed.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `call` and fail it if it was marked with [`fail_on`].
    ///
    /// [`fail_on`]: MemoryCloud::fail_on
    fn record(&self, call: String) -> ProviderResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        let failing = state.fail.contains(&call);
        state.calls.push(call.clone());
        if failing {
            return Err(ProviderError::Status {
                method: "FAKE".to_string(),
                url: call,
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        Ok(state)
    }

    // ── Seeding ───────────────────────────────────────────────────

    pub fn add_instance(&self, name: &str, address: &str) -> String {
        let mut state = self.lock();
        let id = state.id("srv");
        state.instances.push(LiveInstance {
            id: id.clone(),
            name: name.to_string(),
            address: address.to_string(),
            status: "ACTIVE".to_string(),
        });
        id
    }

    pub fn add_security_group(&self, name: &str) -> String {
        let mut state = self.lock();
        let id = state.id("sg");
        state.groups.push(LiveSecurityGroup {
            id: id.clone(),
            name: name.to_string(),
            description: String::new(),
            rules: Vec::new(),
        });
        id
    }

    pub fn add_volume(&self, name: &str) -> String {
        let mut state = self.lock();
        let id = state.id("vol");
        state.volumes.push(LiveVolume {
            id: id.clone(),
            name: name.to_string(),
            status: "available".to_string(),
            size: 1,
            attached_to: Vec::new(),
        });
        id
    }

    pub fn add_container(&self, node: &str, id: &str, image: &str) {
        self.lock()
            .containers
            .entry(node.to_string())
            .or_default()
            .push(LiveContainer {
                id: id.to_string(),
                image: image.to_string(),
                status: "running".to_string(),
                names: vec![format!("/{id}")],
            });
    }

    pub fn add_image(&self, node: &str, id: &str, tag: &str) {
        self.lock()
            .images
            .entry(node.to_string())
            .or_default()
            .push(LiveImage {
                id: id.to_string(),
                repo_tags: vec![tag.to_string()],
            });
    }

    /// Chunks every subsequent pull streams back.
    pub fn set_pull_chunks(&self, chunks: Vec<&'static str>) {
        self.lock().pull_chunks = chunks
            .into_iter()
            .map(|chunk| Bytes::from_static(chunk.as_bytes()))
            .collect();
    }

    /// Make the call recorded as `call` fail.
    pub fn fail_on(&self, call: impl Into<String>) {
        self.lock().fail.insert(call.into());
    }

    // ── Inspection ────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Recorded calls starting with `prefix`, sorted (fan-out order is
    /// not deterministic).
    pub fn calls_with(&self, prefix: &str) -> Vec<String> {
        let mut calls: Vec<String> = self
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect();
        calls.sort();
        calls
    }

    pub fn instances(&self) -> Vec<LiveInstance> {
        self.lock().instances.clone()
    }

    pub fn groups(&self) -> Vec<LiveSecurityGroup> {
        self.lock().groups.clone()
    }

    pub fn volumes(&self) -> Vec<LiveVolume> {
        self.lock().volumes.clone()
    }

    /// `(node name, request)` of every container created.
    pub fn created_containers(&self) -> Vec<(String, CreateRequest)> {
        self.lock().created.clone()
    }

    pub fn containers_on(&self, node: &str) -> Vec<LiveContainer> {
        self.lock().containers.get(node).cloned().unwrap_or_default()
    }
}

fn not_found(kind: &'static str, name: &str) -> ProviderError {
    ProviderError::NotFound {
        kind,
        name: name.to_string(),
    }
}

#[async_trait]
impl ComputeProvider for MemoryCloud {
    async fn list_instances(&self) -> ProviderResult<Vec<LiveInstance>> {
        let state = self.record("list_instances".to_string())?;
        Ok(state.instances.clone())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> ProviderResult<LiveInstance> {
        let mut state = self.record(format!("create_instance {}", spec.name))?;
        let instance = LiveInstance {
            id: state.id("srv"),
            name: spec.name.clone(),
            address: String::new(),
            status: "BUILD".to_string(),
        };
        state.instances.push(instance.clone());
        Ok(instance)
    }

    async fn destroy_instance(&self, id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("destroy_instance {id}"))?;
        let before = state.instances.len();
        state.instances.retain(|i| i.id != id);
        if state.instances.len() == before {
            return Err(not_found("instance", id));
        }
        Ok(())
    }

    async fn attach_volume(&self, node_id: &str, volume_id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("attach_volume {node_id} {volume_id}"))?;
        let volume = state
            .volumes
            .iter_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        volume.attached_to.push(node_id.to_string());
        volume.status = "in-use".to_string();
        Ok(())
    }

    async fn detach_volume(&self, node_id: &str, volume_id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("detach_volume {node_id} {volume_id}"))?;
        let volume = state
            .volumes
            .iter_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        volume.attached_to.retain(|n| n != node_id);
        if volume.attached_to.is_empty() {
            volume.status = "available".to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkProvider for MemoryCloud {
    async fn list_security_groups(&self) -> ProviderResult<Vec<LiveSecurityGroup>> {
        let state = self.record("list_security_groups".to_string())?;
        Ok(state.groups.clone())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> ProviderResult<String> {
        let mut state = self.record(format!("create_security_group {name}"))?;
        let id = state.id("sg");
        state.groups.push(LiveSecurityGroup {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            rules: Vec::new(),
        });
        Ok(id)
    }

    async fn destroy_security_group(&self, id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("destroy_security_group {id}"))?;
        let before = state.groups.len();
        state.groups.retain(|g| g.id != id);
        if state.groups.len() == before {
            return Err(not_found("security group", id));
        }
        Ok(())
    }

    async fn create_security_group_rule(&self, rule: &SecurityRuleRequest) -> ProviderResult<()> {
        let mut state = self.record(format!(
            "create_security_group_rule {} {}",
            rule.security_group_id, rule.remote_ip_prefix
        ))?;
        let id = state.id("rule");
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.id == rule.security_group_id)
            .ok_or_else(|| not_found("security group", &rule.security_group_id))?;
        group.rules.push(LiveRule {
            id,
            direction: rule.direction.clone(),
            ethertype: rule.ethertype.clone(),
            protocol: rule.protocol.clone(),
            port_range_min: rule.port_range_min,
            port_range_max: rule.port_range_max,
            remote_ip_prefix: Some(rule.remote_ip_prefix.clone()),
        });
        Ok(())
    }
}

#[async_trait]
impl BlockStorageProvider for MemoryCloud {
    async fn create_volume(&self, spec: &VolumeSpec) -> ProviderResult<CreatedVolume> {
        let mut state = self.record(format!("create_volume {}", spec.name))?;
        let id = state.id("vol");
        state.volumes.push(LiveVolume {
            id: id.clone(),
            name: spec.name.clone(),
            status: "available".to_string(),
            size: spec.size,
            attached_to: Vec::new(),
        });
        Ok(CreatedVolume {
            id,
            name: spec.name.clone(),
        })
    }

    async fn list_volumes(&self) -> ProviderResult<Vec<LiveVolume>> {
        let state = self.record("list_volumes".to_string())?;
        Ok(state.volumes.clone())
    }

    async fn destroy_volume(&self, id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("destroy_volume {id}"))?;
        let before = state.volumes.len();
        state.volumes.retain(|v| v.id != id);
        if state.volumes.len() == before {
            return Err(not_found("volume", id));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MemoryCloud {
    async fn pull_image(
        &self,
        node: &NodeRecord,
        repo: &str,
        _auth: Option<&RegistryAuth>,
    ) -> ProviderResult<PullStream> {
        let state = self.record(format!("pull_image {} {repo}", node.name))?;
        let chunks: Vec<ProviderResult<Bytes>> = state.pull_chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn list_containers(&self, node: &NodeRecord) -> ProviderResult<Vec<LiveContainer>> {
        let state = self.record(format!("list_containers {}", node.name))?;
        Ok(state.containers.get(&node.name).cloned().unwrap_or_default())
    }

    async fn create_and_start(
        &self,
        node: &NodeRecord,
        request: &CreateRequest,
    ) -> ProviderResult<String> {
        let mut state = self.record(format!("create_and_start {} {}", node.name, request.image))?;
        let id = state.id("ctr");
        state
            .containers
            .entry(node.name.clone())
            .or_default()
            .push(LiveContainer {
                id: id.clone(),
                image: request.image.clone(),
                status: "running".to_string(),
                names: Vec::new(),
            });
        state.created.push((node.name.clone(), request.clone()));
        Ok(id)
    }

    async fn start(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("start {} {container_id}", node.name))?;
        set_status(&mut state, &node.name, container_id, "running")
    }

    async fn stop(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("stop {} {container_id}", node.name))?;
        set_status(&mut state, &node.name, container_id, "exited")
    }

    async fn remove(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("remove {} {container_id}", node.name))?;
        let containers = state.containers.entry(node.name.clone()).or_default();
        let before = containers.len();
        containers.retain(|c| c.id != container_id);
        if containers.len() == before {
            return Err(not_found("container", container_id));
        }
        Ok(())
    }

    async fn list_images(&self, node: &NodeRecord) -> ProviderResult<Vec<LiveImage>> {
        let state = self.record(format!("list_images {}", node.name))?;
        Ok(state.images.get(&node.name).cloned().unwrap_or_default())
    }

    async fn remove_image(&self, node: &NodeRecord, image_id: &str) -> ProviderResult<()> {
        let mut state = self.record(format!("remove_image {} {image_id}", node.name))?;
        let images = state.images.entry(node.name.clone()).or_default();
        let before = images.len();
        images.retain(|i| i.id != image_id);
        if images.len() == before {
            return Err(not_found("image", image_id));
        }
        Ok(())
    }
}

fn set_status(state: &mut State, node: &str, container_id: &str, status: &str) -> ProviderResult<()> {
    let container = state
        .containers
        .get_mut(node)
        .and_then(|cs| cs.iter_mut().find(|c| c.id == container_id))
        .ok_or_else(|| not_found("container", container_id))?;
    container.status = status.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_injects_failures() {
        let cloud = MemoryCloud::new();
        cloud.fail_on("create_instance web-2");

        let spec = |name: &str| InstanceSpec {
            name: name.to_string(),
            image_ref: "img".to_string(),
            flavor_ref: "m1".to_string(),
            security_groups: Vec::new(),
            key_name: None,
            user_data: None,
            availability_zone: None,
        };
        cloud.create_instance(&spec("web-1")).await.unwrap();
        let err = cloud.create_instance(&spec("web-2")).await.unwrap_err();

        assert!(matches!(err, ProviderError::Status { status: 500, .. }));
        assert_eq!(cloud.calls(), vec!["create_instance web-1", "create_instance web-2"]);
        assert_eq!(cloud.instances().len(), 1);
    }

    #[tokio::test]
    async fn volumes_attach_and_detach() {
        let cloud = MemoryCloud::new();
        let srv = cloud.add_instance("db-1", "10.0.0.1");
        let vol = cloud.add_volume("db-1-data");

        cloud.attach_volume(&srv, &vol).await.unwrap();
        assert_eq!(cloud.volumes()[0].attached_to, vec![srv.clone()]);

        cloud.detach_volume(&srv, &vol).await.unwrap();
        assert!(cloud.volumes()[0].attached_to.is_empty());
        assert_eq!(cloud.volumes()[0].status, "available");
    }

    #[tokio::test]
    async fn destroying_unknown_ids_fails() {
        let cloud = MemoryCloud::new();
        assert!(matches!(
            cloud.destroy_volume("nope").await.unwrap_err(),
            ProviderError::NotFound { kind: "volume", .. }
        ));
    }

    #[tokio::test]
    async fn pull_streams_configured_chunks() {
        use futures_util::StreamExt;
        use std::sync::Arc;
        use stratus_core::config::NodeTypeConfig;

        let cloud = MemoryCloud::new();
        cloud.set_pull_chunks(vec!["{\"status\":\"Pulling\"}\n", "done"]);
        let node = NodeRecord {
            id: "srv-1".to_string(),
            name: "web-1".to_string(),
            address: "10.0.0.1".to_string(),
            index: 1,
            node_type: Arc::new(NodeTypeConfig {
                name: "web".to_string(),
                ..Default::default()
            }),
        };

        let stream = cloud.pull_image(&node, "nginx:1.25", None).await.unwrap();
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"{\"status\":\"Pulling\"}\n"),
                Bytes::from_static(b"done"),
            ]
        );
        assert_eq!(cloud.calls(), vec!["pull_image web-1 nginx:1.25"]);
    }
}

//! stratus-provider — the remote APIs Stratus drives.
//!
//! Operations only see the four traits below. [`openstack::OpenStack`]
//! implements the first three over one authenticated session,
//! [`docker::DockerEngine`] implements [`ContainerRuntime`], and
//! [`memory::MemoryCloud`] implements all four in memory for tests.

pub mod docker;
pub mod error;
pub mod http;
pub mod memory;
pub mod openstack;
pub mod progress;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use stratus_core::config::RegistryAuth;
use stratus_core::{
    CreateRequest, InstanceSpec, LiveContainer, LiveImage, LiveInstance, LiveSecurityGroup,
    LiveVolume, NodeRecord, SecurityRuleRequest, VolumeSpec,
};

pub use error::{ProviderError, ProviderResult};
pub use progress::follow_pull;

/// Raw pull progress as delivered by the runtime.
pub type PullStream = Pin<Box<dyn Stream<Item = ProviderResult<Bytes>> + Send>>;

/// Identity of a freshly created volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedVolume {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn list_instances(&self) -> ProviderResult<Vec<LiveInstance>>;
    async fn create_instance(&self, spec: &InstanceSpec) -> ProviderResult<LiveInstance>;
    async fn destroy_instance(&self, id: &str) -> ProviderResult<()>;
    async fn attach_volume(&self, node_id: &str, volume_id: &str) -> ProviderResult<()>;
    async fn detach_volume(&self, node_id: &str, volume_id: &str) -> ProviderResult<()>;
}

#[async_trait]
pub trait NetworkProvider: Send + Sync {
    async fn list_security_groups(&self) -> ProviderResult<Vec<LiveSecurityGroup>>;
    /// Returns the id of the new group.
    async fn create_security_group(&self, name: &str, description: &str) -> ProviderResult<String>;
    async fn destroy_security_group(&self, id: &str) -> ProviderResult<()>;
    async fn create_security_group_rule(&self, rule: &SecurityRuleRequest) -> ProviderResult<()>;
}

#[async_trait]
pub trait BlockStorageProvider: Send + Sync {
    async fn create_volume(&self, spec: &VolumeSpec) -> ProviderResult<CreatedVolume>;
    async fn list_volumes(&self) -> ProviderResult<Vec<LiveVolume>>;
    async fn destroy_volume(&self, id: &str) -> ProviderResult<()>;
}

/// Container runtime of one node, addressed through the node record.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull_image(
        &self,
        node: &NodeRecord,
        repo: &str,
        auth: Option<&RegistryAuth>,
    ) -> ProviderResult<PullStream>;
    async fn list_containers(&self, node: &NodeRecord) -> ProviderResult<Vec<LiveContainer>>;
    /// Create a container and start it. Returns the container id.
    async fn create_and_start(
        &self,
        node: &NodeRecord,
        request: &CreateRequest,
    ) -> ProviderResult<String>;
    async fn start(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()>;
    async fn stop(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()>;
    async fn remove(&self, node: &NodeRecord, container_id: &str) -> ProviderResult<()>;
    async fn list_images(&self, node: &NodeRecord) -> ProviderResult<Vec<LiveImage>>;
    async fn remove_image(&self, node: &NodeRecord, image_id: &str) -> ProviderResult<()>;
}

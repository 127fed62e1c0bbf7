//! Everything an operation needs: configuration, provider handles, the
//! container filter, and the remote shell.

use std::sync::Arc;

use tracing::debug;

use stratus_core::ClusterConfig;
use stratus_core::naming::compose_group_name;
use stratus_provider::http::HttpClient;
use stratus_provider::{BlockStorageProvider, ComputeProvider, ContainerRuntime, NetworkProvider};
use stratus_topology::{ContainerFilter, Topology};

use crate::error::{OpsError, OpsResult};
use crate::remote::{RemoteShell, SshShell};

/// Provider handles, one per API surface.
#[derive(Clone)]
pub struct Providers {
    pub compute: Arc<dyn ComputeProvider>,
    pub network: Arc<dyn NetworkProvider>,
    pub storage: Arc<dyn BlockStorageProvider>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

impl Providers {
    /// Use one value for every surface, e.g. the in-memory cloud.
    pub fn shared<P>(provider: Arc<P>) -> Self
    where
        P: ComputeProvider + NetworkProvider + BlockStorageProvider + ContainerRuntime + 'static,
    {
        Self {
            compute: provider.clone(),
            network: provider.clone(),
            storage: provider.clone(),
            runtime: provider,
        }
    }
}

/// A cluster as one invocation sees it.
pub struct Cluster {
    config: ClusterConfig,
    providers: Providers,
    http: HttpClient,
    filter: ContainerFilter,
    shell: Option<Arc<dyn RemoteShell>>,
}

impl Cluster {
    /// The remote shell defaults to ssh when the config has an `[ssh]`
    /// section.
    pub fn new(config: ClusterConfig, providers: Providers, http: HttpClient) -> Self {
        let shell = config
            .ssh
            .as_ref()
            .map(|ssh| Arc::new(SshShell::new(ssh)) as Arc<dyn RemoteShell>);
        Self {
            config,
            providers,
            http,
            filter: ContainerFilter::default(),
            shell,
        }
    }

    /// Restrict container operations to what `filter` lets through.
    pub fn with_filter(mut self, filter: ContainerFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Replace the remote shell, ssh or not.
    pub fn with_shell(mut self, shell: Arc<dyn RemoteShell>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.cluster.name
    }

    pub fn compute(&self) -> &dyn ComputeProvider {
        self.providers.compute.as_ref()
    }

    pub fn network(&self) -> &dyn NetworkProvider {
        self.providers.network.as_ref()
    }

    pub fn storage(&self) -> &dyn BlockStorageProvider {
        self.providers.storage.as_ref()
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.providers.runtime.as_ref()
    }

    /// Client used by reachability tests.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn filter(&self) -> &ContainerFilter {
        &self.filter
    }

    /// The remote shell, or [`OpsError::MissingSection`] without `[ssh]`.
    pub fn shell(&self) -> OpsResult<&dyn RemoteShell> {
        self.shell.as_deref().ok_or(OpsError::MissingSection("ssh"))
    }

    /// Provider-side name of a declared security group.
    pub fn group_name(&self, group: &str) -> String {
        compose_group_name(self.name(), group)
    }

    /// Gather phase shared by most operations: list live instances and
    /// keep the ones that match a declared node type.
    pub async fn topology(&self) -> OpsResult<Topology> {
        let live = self.compute().list_instances().await?;
        let topology = Topology::from_live(&self.config.node_types, &live);
        debug!(
            cluster = %self.name(),
            live = live.len(),
            matched = topology.len(),
            "gathered topology"
        );
        Ok(topology)
    }
}

//! Container operations on every node's runtime.
//!
//! `run`, `start`, `stop`, `remove` and `remove-images` only touch what
//! the cluster's [`ContainerFilter`](stratus_topology::ContainerFilter)
//! lets through.

use tracing::{error, info};

use stratus_core::{CreateRequest, NodeRecord};
use stratus_fanout::{FailurePolicy, Gathered, run};
use stratus_provider::follow_pull;
use stratus_topology::{
    ContainerWorkItem, HostsTable, join_containers, join_images, join_live_images, with_extra_hosts,
};

use crate::context::Cluster;
use crate::error::{OpsError, OpsResult};
use crate::operation::NodeContainer;
use crate::settle;

/// Pull every node's declared images and wait for each pull to finish.
pub async fn pull(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let topology = cluster.topology().await?;
    let items = join_images(topology.nodes(), &cluster.config().images);
    info!(count = items.len(), "pulling images");

    let report = run(items, policy, |item| async move {
        let repo = &item.image.repo;
        let pulled = async {
            let stream = cluster
                .runtime()
                .pull_image(item.node, repo, item.image.auth.as_ref())
                .await?;
            follow_pull(repo, stream).await
        }
        .await;
        pulled.inspect_err(|e| error!(node = %item.node.name, image = %repo, error = %e, "pull failed"))?;
        info!(node = %item.node.name, image = %repo, "image pulled");
        Ok::<_, OpsError>(())
    })
    .await;
    settle("pull", [report])
}

/// Create and start one container per node and declared image.
///
/// Each container's hosts file gets every cluster node, `dockerhost`
/// pointing at its own node, and the image's aliases.
pub async fn run_containers(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let topology = cluster.topology().await?;
    let hosts = HostsTable::from_nodes(topology.nodes());
    let items: Vec<_> = join_images(topology.nodes(), &cluster.config().images)
        .into_iter()
        .filter(|item| cluster.filter().accepts_image(item))
        .collect();
    info!(count = items.len(), "running containers");

    let report = run(items, policy, |item| {
        let hosts = &hosts;
        async move {
            let run = &item.image.run;
            let entries = hosts.for_container(&item.node.address, run);
            let request = CreateRequest {
                image: item.image.repo.clone(),
                cmd: run.cmd.clone(),
                create_options: with_extra_hosts(&run.create, &entries),
                start_options: run.start.clone(),
            };
            let id = cluster
                .runtime()
                .create_and_start(item.node, &request)
                .await
                .inspect_err(|e| error!(node = %item.node.name, image = %item.image_name, error = %e, "run failed"))?;
            info!(node = %item.node.name, image = %item.image_name, container = %id, "container started");
            Ok::<_, OpsError>(())
        }
    })
    .await;
    settle("run", [report])
}

/// Containers of every matched node.
///
/// Every node is queried even when some fail; the first failure is
/// returned after the others have answered.
pub async fn list_containers(cluster: &Cluster) -> OpsResult<Vec<NodeContainer>> {
    let topology = cluster.topology().await?;
    let Gathered { values, report } = join_containers(topology.nodes(), |node| list_on(cluster, node)).await;
    settle("list-containers", [report])?;
    Ok(values
        .into_iter()
        .map(|item| NodeContainer {
            node: item.node.name.clone(),
            address: item.node.address.clone(),
            container: item.container,
        })
        .collect())
}

async fn list_on(cluster: &Cluster, node: &NodeRecord) -> OpsResult<Vec<stratus_core::LiveContainer>> {
    cluster
        .runtime()
        .list_containers(node)
        .await
        .inspect_err(|e| error!(node = %node.name, error = %e, "listing containers failed"))
        .map_err(OpsError::from)
}

/// Lifecycle action applied to existing containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Remove,
}

impl ContainerAction {
    pub fn label(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Remove => "remove",
        }
    }

    async fn apply(&self, cluster: &Cluster, item: &ContainerWorkItem<'_>) -> OpsResult<()> {
        let runtime = cluster.runtime();
        let id = &item.container.id;
        match self {
            ContainerAction::Start => runtime.start(item.node, id).await?,
            ContainerAction::Stop => runtime.stop(item.node, id).await?,
            ContainerAction::Remove => runtime.remove(item.node, id).await?,
        }
        Ok(())
    }
}

/// Apply `action` to every filtered container of every matched node.
///
/// Nodes whose listing fails contribute no containers; the others are
/// still acted on.
pub async fn manage_containers(
    cluster: &Cluster,
    action: ContainerAction,
    policy: FailurePolicy,
) -> OpsResult<()> {
    let topology = cluster.topology().await?;
    let Gathered { values, report: listed } =
        join_containers(topology.nodes(), |node| list_on(cluster, node)).await;
    let items: Vec<_> = values
        .into_iter()
        .filter(|item| cluster.filter().accepts_container(item))
        .collect();
    info!(action = action.label(), count = items.len(), "managing containers");

    let acted = run(items, policy, |item| async move {
        action
            .apply(cluster, &item)
            .await
            .inspect_err(|e| error!(node = %item.node.name, container = %item.container.id, action = action.label(), error = %e, "container action failed"))?;
        info!(node = %item.node.name, container = %item.container.id, action = action.label(), "done");
        Ok::<_, OpsError>(())
    })
    .await;
    settle(action.label(), [listed, acted])
}

/// Remove filtered images from every matched node's runtime.
pub async fn remove_images(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let topology = cluster.topology().await?;
    let Gathered { values, report: listed } = join_live_images(topology.nodes(), |node| async move {
        cluster
            .runtime()
            .list_images(node)
            .await
            .inspect_err(|e| error!(node = %node.name, error = %e, "listing images failed"))
            .map_err(OpsError::from)
    })
    .await;
    let items: Vec<_> = values
        .into_iter()
        .filter(|item| cluster.filter().accepts_live_image(item))
        .collect();
    info!(count = items.len(), "removing images");

    let removed = run(items, policy, |item| async move {
        cluster
            .runtime()
            .remove_image(item.node, &item.image.id)
            .await
            .inspect_err(|e| error!(node = %item.node.name, image = %item.image.reference(), error = %e, "removing image failed"))?;
        info!(node = %item.node.name, image = %item.image.reference(), "image removed");
        Ok::<_, OpsError>(())
    })
    .await;
    settle("remove-images", [listed, removed])
}

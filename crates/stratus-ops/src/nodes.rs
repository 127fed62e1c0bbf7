//! Node lifecycle: list, create, destroy.

use tracing::{debug, error, info};

use stratus_core::{InstanceSpec, NodeRecord};
use stratus_fanout::{FailurePolicy, run};
use stratus_topology::declared_node_names;

use crate::context::Cluster;
use crate::error::{OpsError, OpsResult};
use crate::settle;

/// Live instances that match a declared node type.
pub async fn list_nodes(cluster: &Cluster) -> OpsResult<Vec<NodeRecord>> {
    let topology = cluster.topology().await?;
    for (node_type, count) in topology.count_by_type(&cluster.config().node_types) {
        debug!(node_type = %node_type, count, "nodes by type");
    }
    Ok(topology.into_nodes())
}

/// Instance requests for every declared node name.
pub fn instance_specs(cluster: &Cluster) -> Vec<InstanceSpec> {
    let provider = &cluster.config().provider;
    declared_node_names(&cluster.config().node_types)
        .into_iter()
        .map(|(node_type, name)| InstanceSpec {
            name,
            image_ref: node_type.image_ref.clone(),
            flavor_ref: node_type.flavor_ref.clone(),
            security_groups: node_type
                .security_groups
                .iter()
                .map(|g| cluster.group_name(g))
                .collect(),
            key_name: provider.key_name.clone(),
            user_data: provider.user_data.clone(),
            availability_zone: provider.availability_zone.clone(),
        })
        .collect()
}

/// Create `<type>-1 ..= <type>-<count>` for every declared type.
///
/// Existing instances are not consulted; running this twice creates
/// duplicates.
pub async fn create_nodes(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let specs = instance_specs(cluster);
    info!(count = specs.len(), "creating nodes");

    let report = run(specs, policy, |spec| async move {
        let instance = cluster
            .compute()
            .create_instance(&spec)
            .await
            .inspect_err(|e| error!(node = %spec.name, error = %e, "creating node failed"))?;
        info!(node = %instance.name, id = %instance.id, "node created");
        Ok::<_, OpsError>(())
    })
    .await;
    settle("create-nodes", [report])
}

/// Destroy every matched instance.
pub async fn destroy_nodes(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let topology = cluster.topology().await?;
    info!(count = topology.len(), "destroying nodes");

    let report = run(topology.nodes(), policy, |node| async move {
        cluster
            .compute()
            .destroy_instance(&node.id)
            .await
            .inspect_err(|e| error!(node = %node.name, error = %e, "destroying node failed"))?;
        info!(node = %node.name, id = %node.id, "node destroyed");
        Ok::<_, OpsError>(())
    })
    .await;
    settle("destroy-nodes", [report])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::{cluster_with, config};
    use stratus_provider::memory::MemoryCloud;

    #[tokio::test]
    async fn create_requests_every_declared_name() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut config = config();
        config.provider.key_name = Some("deploy".to_string());
        let cluster = cluster_with(config, cloud.clone());

        let specs = instance_specs(&cluster);
        assert_eq!(specs[0].security_groups, vec!["demo-internal"]);
        assert_eq!(specs[0].key_name.as_deref(), Some("deploy"));

        create_nodes(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        assert_eq!(
            cloud.calls_with("create_instance"),
            vec!["create_instance db-1", "create_instance web-1", "create_instance web-2"]
        );
    }

    #[tokio::test]
    async fn create_attempts_all_and_reports_first_failure() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.fail_on("create_instance web-1");
        let cluster = cluster_with(config(), cloud.clone());

        let err = create_nodes(&cluster, FailurePolicy::ContinueOnError).await.unwrap_err();
        assert!(matches!(err, OpsError::Provider(_)));
        assert_eq!(cloud.calls_with("create_instance").len(), 3);
        assert_eq!(cloud.instances().len(), 2);
    }

    #[tokio::test]
    async fn destroy_leaves_foreign_instances() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_instance("web-1", "10.0.0.1");
        cloud.add_instance("db-1", "10.0.0.2");
        cloud.add_instance("jenkins", "10.0.0.9");
        let cluster = cluster_with(config(), cloud.clone());

        destroy_nodes(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        let left: Vec<_> = cloud.instances().into_iter().map(|i| i.name).collect();
        assert_eq!(left, vec!["jenkins"]);
    }
}

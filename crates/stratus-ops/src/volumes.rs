//! Block storage: one volume per node and declared volume type, named
//! `<node>-<volume>`.

use std::collections::HashMap;

use tracing::{debug, error, info};

use stratus_core::config::ClusterConfig;
use stratus_core::naming::SEPARATOR;
use stratus_core::{LiveVolume, NodeName, VolumeSpec};
use stratus_fanout::{FailurePolicy, run};
use stratus_topology::join_volumes;

use crate::context::Cluster;
use crate::error::{OpsError, OpsResult};
use crate::settle;

/// Whether `name` is `<node>-<volume>` for a declared node type listing
/// that volume.
///
/// Volume type names may contain the separator, so every declared type
/// that is a suffix of `name` is tried until one leaves a valid node name.
pub fn is_cluster_volume(config: &ClusterConfig, name: &str) -> bool {
    config.volume_types.iter().any(|v| {
        let Some(node_name) = name
            .strip_suffix(v.name.as_str())
            .and_then(|rest| rest.strip_suffix(SEPARATOR))
        else {
            return false;
        };
        match NodeName::parse(node_name, |t| config.node_type(t).is_some()) {
            NodeName::Matched { type_name, .. } => config
                .node_type(type_name)
                .is_some_and(|t| t.volumes.iter().any(|vol| *vol == v.name)),
            NodeName::Unmatched => false,
        }
    })
}

/// Live volumes recognised by [`is_cluster_volume`].
pub async fn list_volumes(cluster: &Cluster) -> OpsResult<Vec<LiveVolume>> {
    let volumes = cluster.storage().list_volumes().await?;
    Ok(volumes
        .into_iter()
        .filter(|v| is_cluster_volume(cluster.config(), &v.name))
        .collect())
}

/// Create the declared volumes of every matched node.
pub async fn create_volumes(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let topology = cluster.topology().await?;
    let items = join_volumes(topology.nodes(), &cluster.config().volume_types);
    info!(count = items.len(), "creating volumes");

    let report = run(items, policy, |item| async move {
        let spec = VolumeSpec {
            name: item.volume_name.clone(),
            size: item.volume_type.size,
            volume_type: item.volume_type.volume_type.clone(),
            description: item.volume_type.description.clone(),
            availability_zone: item.volume_type.availability_zone.clone(),
        };
        let created = cluster
            .storage()
            .create_volume(&spec)
            .await
            .inspect_err(|e| error!(node = %item.node.name, volume = %spec.name, error = %e, "creating volume failed"))?;
        info!(node = %item.node.name, volume = %created.name, id = %created.id, "volume created");
        Ok::<_, OpsError>(())
    })
    .await;
    settle("create-volumes", [report])
}

/// Attach each node's declared volumes. Volumes already attached to the
/// node are left alone.
pub async fn attach_volumes(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let topology = cluster.topology().await?;
    let live = by_name(cluster.storage().list_volumes().await?);
    let items = join_volumes(topology.nodes(), &cluster.config().volume_types);

    let report = run(items, policy, |item| {
        let live = &live;
        async move {
            let volume = live.get(&item.volume_name).ok_or_else(|| OpsError::NotFound {
                kind: "volume",
                name: item.volume_name.clone(),
            })?;
            if volume.attached_to.contains(&item.node.id) {
                debug!(node = %item.node.name, volume = %volume.name, "already attached");
                return Ok(());
            }
            cluster
                .compute()
                .attach_volume(&item.node.id, &volume.id)
                .await
                .inspect_err(|e| error!(node = %item.node.name, volume = %volume.name, error = %e, "attaching volume failed"))?;
            info!(node = %item.node.name, volume = %volume.name, "volume attached");
            Ok::<_, OpsError>(())
        }
    })
    .await;
    settle("attach-volumes", [report])
}

/// Detach each node's declared volumes that are attached to it.
pub async fn detach_volumes(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let topology = cluster.topology().await?;
    let live = by_name(cluster.storage().list_volumes().await?);
    let items = join_volumes(topology.nodes(), &cluster.config().volume_types);

    let report = run(items, policy, |item| {
        let live = &live;
        async move {
            let Some(volume) = live
                .get(&item.volume_name)
                .filter(|v| v.attached_to.contains(&item.node.id))
            else {
                debug!(node = %item.node.name, volume = %item.volume_name, "not attached");
                return Ok(());
            };
            cluster
                .compute()
                .detach_volume(&item.node.id, &volume.id)
                .await
                .inspect_err(|e| error!(node = %item.node.name, volume = %volume.name, error = %e, "detaching volume failed"))?;
            info!(node = %item.node.name, volume = %volume.name, "volume detached");
            Ok::<_, OpsError>(())
        }
    })
    .await;
    settle("detach-volumes", [report])
}

/// Destroy every cluster volume. Attached volumes are left to the
/// provider to refuse; run `detach-volumes` first.
pub async fn destroy_volumes(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let volumes = list_volumes(cluster).await?;
    info!(count = volumes.len(), "destroying volumes");

    let report = run(&volumes, policy, |volume| async move {
        cluster
            .storage()
            .destroy_volume(&volume.id)
            .await
            .inspect_err(|e| error!(volume = %volume.name, error = %e, "destroying volume failed"))?;
        info!(volume = %volume.name, "volume destroyed");
        Ok::<_, OpsError>(())
    })
    .await;
    settle("destroy-volumes", [report])
}

fn by_name(volumes: Vec<LiveVolume>) -> HashMap<String, LiveVolume> {
    volumes.into_iter().map(|v| (v.name.clone(), v)).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::{cluster_with, config};
    use stratus_provider::memory::MemoryCloud;

    #[test]
    fn recognises_cluster_volume_names() {
        let config = config();
        assert!(is_cluster_volume(&config, "web-1-data"));
        assert!(is_cluster_volume(&config, "web-7-data"));
        assert!(!is_cluster_volume(&config, "db-1-data"), "db declares no volumes");
        assert!(!is_cluster_volume(&config, "cache-1-data"));
        assert!(!is_cluster_volume(&config, "web-1-logs"));
        assert!(!is_cluster_volume(&config, "data"));
    }

    #[test]
    fn volume_types_sharing_a_suffix() {
        let mut config = config();
        let mut x_data = config.volume_types[0].clone();
        x_data.name = "x-data".to_string();
        config.volume_types.push(x_data);
        config.node_types[0].volumes = vec!["x-data".to_string()];

        assert!(is_cluster_volume(&config, "web-1-x-data"));
        assert!(!is_cluster_volume(&config, "web-1-data"), "web no longer declares data");
    }

    #[tokio::test]
    async fn create_names_volumes_after_their_node() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_instance("web-1", "10.0.0.1");
        cloud.add_instance("web-2", "10.0.0.2");
        cloud.add_instance("db-1", "10.0.0.3");
        let cluster = cluster_with(config(), cloud.clone());

        create_volumes(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        assert_eq!(
            cloud.calls_with("create_volume"),
            vec!["create_volume web-1-data", "create_volume web-2-data"]
        );
    }

    #[tokio::test]
    async fn attach_skips_attached_and_reports_missing() {
        let cloud = Arc::new(MemoryCloud::new());
        let web1 = cloud.add_instance("web-1", "10.0.0.1");
        cloud.add_instance("web-2", "10.0.0.2");
        let vol = cloud.add_volume("web-1-data");
        let cluster = cluster_with(config(), cloud.clone());

        let err = attach_volumes(&cluster, FailurePolicy::ContinueOnError).await.unwrap_err();
        assert!(matches!(err, OpsError::NotFound { ref name, .. } if name == "web-2-data"));
        assert_eq!(cloud.calls_with("attach_volume"), vec![format!("attach_volume {web1} {vol}")]);

        // Second pass: web-1-data is attached already.
        let _ = attach_volumes(&cluster, FailurePolicy::ContinueOnError).await;
        assert_eq!(cloud.calls_with("attach_volume").len(), 1);

        detach_volumes(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        assert_eq!(cloud.calls_with("detach_volume"), vec![format!("detach_volume {web1} {vol}")]);
        assert!(cloud.volumes()[0].attached_to.is_empty());
    }

    #[tokio::test]
    async fn destroy_only_touches_cluster_volumes() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_volume("web-1-data");
        cloud.add_volume("backup");
        let cluster = cluster_with(config(), cloud.clone());

        destroy_volumes(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        let left: Vec<_> = cloud.volumes().into_iter().map(|v| v.name).collect();
        assert_eq!(left, vec!["backup"]);
    }
}

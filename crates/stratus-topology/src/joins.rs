//! Relational joins: node × declared resource, node × live resource.
//!
//! Work items borrow their node from the gathered topology. Declared
//! image templates are cloned into every item so per-node changes (extra
//! hosts, hostnames) never leak into a sibling item.

use std::collections::BTreeMap;
use std::future::Future;

use tracing::{debug, warn};

use stratus_core::config::{ImageConfig, VolumeTypeConfig};
use stratus_core::naming::compose_volume_name;
use stratus_core::{LiveContainer, LiveImage, NodeRecord};
use stratus_fanout::{Gathered, gather};

/// One declared image to handle on one node.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageWorkItem<'a> {
    pub node: &'a NodeRecord,
    pub image_name: String,
    pub image: ImageConfig,
}

/// One live container on one node.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerWorkItem<'a> {
    pub node: &'a NodeRecord,
    pub container: LiveContainer,
}

/// One declared volume of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeWorkItem<'a> {
    pub node: &'a NodeRecord,
    pub volume_type: &'a VolumeTypeConfig,
    /// Provider-side name, `<node>-<volume>`.
    pub volume_name: String,
}

/// One image present in a node's container runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveImageWorkItem<'a> {
    pub node: &'a NodeRecord,
    pub image: LiveImage,
}

/// Cross every node with the declared images its type lists.
pub fn join_images<'a>(
    nodes: &'a [NodeRecord],
    images: &BTreeMap<String, ImageConfig>,
) -> Vec<ImageWorkItem<'a>> {
    let mut items = Vec::new();
    for node in nodes {
        for image_name in &node.node_type.images {
            match images.get(image_name) {
                Some(image) => items.push(ImageWorkItem {
                    node,
                    image_name: image_name.clone(),
                    image: image.clone(),
                }),
                None => warn!(node = %node.name, image = %image_name, "image not declared, skipping"),
            }
        }
    }
    debug!(nodes = nodes.len(), items = items.len(), "joined nodes with images");
    items
}

/// Cross every node with the volume types its type lists.
pub fn join_volumes<'a>(
    nodes: &'a [NodeRecord],
    volume_types: &'a [VolumeTypeConfig],
) -> Vec<VolumeWorkItem<'a>> {
    let mut items = Vec::new();
    for node in nodes {
        for volume in &node.node_type.volumes {
            match volume_types.iter().find(|v| &v.name == volume) {
                Some(volume_type) => items.push(VolumeWorkItem {
                    node,
                    volume_type,
                    volume_name: compose_volume_name(&node.name, &volume_type.name),
                }),
                None => warn!(node = %node.name, volume = %volume, "volume type not declared, skipping"),
            }
        }
    }
    debug!(nodes = nodes.len(), items = items.len(), "joined nodes with volumes");
    items
}

/// Query every node's containers concurrently and cross each node with
/// what it returned.
///
/// A node whose listing fails contributes no items; its error is kept in
/// the report so the caller can still act on the other nodes.
pub async fn join_containers<'a, E, F, Fut>(
    nodes: &'a [NodeRecord],
    list: F,
) -> Gathered<ContainerWorkItem<'a>, E>
where
    F: Fn(&'a NodeRecord) -> Fut,
    Fut: Future<Output = Result<Vec<LiveContainer>, E>>,
{
    let list = &list;
    let per_node = gather(nodes.iter(), |node| {
        let listing = list(node);
        async move {
            let containers = listing.await?;
            Ok(containers
                .into_iter()
                .map(|container| ContainerWorkItem { node, container })
                .collect::<Vec<_>>())
        }
    })
    .await;
    flatten(per_node)
}

/// Like [`join_containers`] for the images present on every node.
pub async fn join_live_images<'a, E, F, Fut>(
    nodes: &'a [NodeRecord],
    list: F,
) -> Gathered<LiveImageWorkItem<'a>, E>
where
    F: Fn(&'a NodeRecord) -> Fut,
    Fut: Future<Output = Result<Vec<LiveImage>, E>>,
{
    let list = &list;
    let per_node = gather(nodes.iter(), |node| {
        let listing = list(node);
        async move {
            let images = listing.await?;
            Ok(images
                .into_iter()
                .map(|image| LiveImageWorkItem { node, image })
                .collect::<Vec<_>>())
        }
    })
    .await;
    flatten(per_node)
}

fn flatten<R, E>(per_node: Gathered<Vec<R>, E>) -> Gathered<R, E> {
    Gathered {
        values: per_node.values.into_iter().flatten().collect(),
        report: per_node.report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::node;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn image(repo: &str) -> ImageConfig {
        ImageConfig {
            repo: repo.to_string(),
            auth: None,
            run: Default::default(),
        }
    }

    fn with_lists(mut record: NodeRecord, images: &[&str], volumes: &[&str]) -> NodeRecord {
        let mut node_type = (*record.node_type).clone();
        node_type.images = images.iter().map(|s| s.to_string()).collect();
        node_type.volumes = volumes.iter().map(|s| s.to_string()).collect();
        record.node_type = Arc::new(node_type);
        record
    }

    fn container(id: &str, image: &str) -> LiveContainer {
        LiveContainer {
            id: id.to_string(),
            image: image.to_string(),
            status: "running".to_string(),
            names: vec![format!("/{id}")],
        }
    }

    #[test]
    fn images_follow_each_node_type() {
        let nodes = vec![
            with_lists(node("web", 1, "a"), &["nginx", "agent"], &[]),
            with_lists(node("db", 1, "b"), &["postgres"], &[]),
        ];
        let mut images = BTreeMap::new();
        images.insert("nginx".to_string(), image("r/nginx:1"));
        images.insert("agent".to_string(), image("r/agent:1"));
        images.insert("postgres".to_string(), image("r/postgres:16"));

        let items = join_images(&nodes, &images);
        let pairs: Vec<(&str, &str)> = items
            .iter()
            .map(|i| (i.node.name.as_str(), i.image_name.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("web-1", "nginx"), ("web-1", "agent"), ("db-1", "postgres")]
        );
        assert_eq!(items[2].image.repo, "r/postgres:16");
    }

    #[test]
    fn image_items_own_their_template() {
        let nodes = vec![
            with_lists(node("web", 1, "a"), &["nginx"], &[]),
            with_lists(node("web", 2, "b"), &["nginx"], &[]),
        ];
        let mut images = BTreeMap::new();
        images.insert("nginx".to_string(), image("r/nginx:1"));

        let mut items = join_images(&nodes, &images);
        items[0].image.run.create = serde_json::json!({"Hostname": "changed"});

        assert_eq!(items[1].image.run.create, serde_json::json!({}));
        assert_eq!(images["nginx"].run.create, serde_json::json!({}));
    }

    #[test]
    fn undeclared_images_are_skipped() {
        let nodes = vec![with_lists(node("web", 1, "a"), &["missing"], &[])];
        assert!(join_images(&nodes, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn volumes_are_named_after_node() {
        let nodes = vec![
            with_lists(node("db", 1, "a"), &[], &["data", "logs"]),
            with_lists(node("db", 2, "b"), &[], &["data"]),
        ];
        let volume_types = vec![
            VolumeTypeConfig {
                name: "data".to_string(),
                size: 10,
                volume_type: None,
                description: None,
                availability_zone: None,
            },
            VolumeTypeConfig {
                name: "logs".to_string(),
                size: 1,
                volume_type: None,
                description: None,
                availability_zone: None,
            },
        ];

        let names: Vec<String> = join_volumes(&nodes, &volume_types)
            .into_iter()
            .map(|v| v.volume_name)
            .collect();
        assert_eq!(names, vec!["db-1-data", "db-1-logs", "db-2-data"]);
    }

    #[tokio::test]
    async fn containers_are_listed_once_per_node() {
        let nodes = vec![node("web", 1, "a"), node("web", 2, "b"), node("db", 1, "c")];
        let calls = AtomicUsize::new(0);

        let gathered = join_containers(&nodes, |n: &NodeRecord| {
            calls.fetch_add(1, Ordering::SeqCst);
            let name = n.name.clone();
            async move {
                match name.as_str() {
                    "web-1" => Ok(vec![container("c1", "r/nginx:1"), container("c2", "r/agent:1")]),
                    "web-2" => Ok(Vec::new()),
                    _ => Err(format!("{name} unreachable")),
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let ids: Vec<&str> = gathered
            .values
            .iter()
            .map(|i| i.container.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(gathered.values.iter().all(|i| i.node.name == "web-1"));
        assert_eq!(
            gathered.report.first_failure(),
            Some(&"db-1 unreachable".to_string())
        );
    }

    #[tokio::test]
    async fn live_images_are_crossed_with_nodes() {
        let nodes = vec![node("web", 1, "a"), node("web", 2, "b")];

        let gathered = join_live_images(&nodes, |n: &NodeRecord| {
            let id = format!("sha256:{}", n.index);
            async move {
                Ok::<_, String>(vec![LiveImage {
                    id,
                    repo_tags: Vec::new(),
                }])
            }
        })
        .await;

        let pairs: Vec<(&str, &str)> = gathered
            .values
            .iter()
            .map(|i| (i.node.name.as_str(), i.image.id.as_str()))
            .collect();
        assert_eq!(pairs, vec![("web-1", "sha256:1"), ("web-2", "sha256:2")]);
        assert!(gathered.report.is_success());
    }
}

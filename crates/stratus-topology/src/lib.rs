//! stratus-topology — turns a declared cluster and a live snapshot into
//! concrete work items.
//!
//! # Architecture
//!
//! ```text
//! ClusterConfig.node_types ─┐
//!                           ├── match_nodes() → Topology (Vec<NodeRecord>)
//! list_instances() ─────────┘        │
//!                                    ├── join_images()     → ImageWorkItem*
//!                                    ├── join_containers() → ContainerWorkItem*
//!                                    ├── join_volumes()    → VolumeWorkItem*
//!                                    ├── expand_rules()    → SecurityRuleRequest*
//!                                    └── HostsTable        → HostEntry*
//! ```
//!
//! Everything here is pure except the container and image joins, which
//! take the live per-node query as a closure so the crate stays free of
//! any provider client.

pub mod filter;
pub mod hosts;
pub mod joins;
pub mod matcher;
pub mod rules;

pub use filter::ContainerFilter;
pub use hosts::{HostsTable, build_hosts, hosts_file_lines, to_extra_hosts, with_extra_hosts};
pub use joins::{
    ContainerWorkItem, ImageWorkItem, LiveImageWorkItem, VolumeWorkItem, join_containers,
    join_images, join_live_images, join_volumes,
};
pub use matcher::{Topology, declared_node_names, match_nodes};
pub use rules::expand_rules;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use stratus_core::{NodeRecord, config::NodeTypeConfig};

    pub fn node_type(name: &str) -> NodeTypeConfig {
        NodeTypeConfig {
            name: name.to_string(),
            count: 1,
            image_ref: "img".to_string(),
            flavor_ref: "flavor".to_string(),
            ..Default::default()
        }
    }

    pub fn node(type_name: &str, index: u32, address: &str) -> NodeRecord {
        NodeRecord {
            id: format!("id-{type_name}-{index}"),
            name: format!("{type_name}-{index}"),
            address: address.to_string(),
            index,
            node_type: Arc::new(node_type(type_name)),
        }
    }
}

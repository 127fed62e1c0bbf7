//! Topology matcher — intersects live instances with declared node types.
//!
//! A live instance becomes a [`NodeRecord`] only when its name is
//! `<declared type>-<index>`. Everything else on the provider account is
//! ignored, which lets several clusters (and unrelated servers) share one
//! project.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use stratus_core::config::NodeTypeConfig;
use stratus_core::naming::{NodeName, compose_node_name};
use stratus_core::{LiveInstance, NodeRecord};

/// Match `live` instances against `declared` node types.
///
/// The result follows the provider's listing order. Each instance is
/// matched at most once; a declared type may end up with any number of
/// records.
pub fn match_nodes(declared: &[NodeTypeConfig], live: &[LiveInstance]) -> Vec<NodeRecord> {
    let types: HashMap<&str, Arc<NodeTypeConfig>> = declared
        .iter()
        .map(|t| (t.name.as_str(), Arc::new(t.clone())))
        .collect();

    let mut records = Vec::new();
    for instance in live {
        match NodeName::parse(&instance.name, |t| types.contains_key(t)) {
            NodeName::Matched { type_name, index } => {
                let Some(node_type) = types.get(type_name) else {
                    continue;
                };
                records.push(NodeRecord {
                    id: instance.id.clone(),
                    name: instance.name.clone(),
                    address: instance.address.clone(),
                    index,
                    node_type: Arc::clone(node_type),
                });
            }
            NodeName::Unmatched => {
                debug!(instance = %instance.name, "live instance not part of declared topology");
            }
        }
    }

    debug!(live = live.len(), matched = records.len(), "matched topology");
    records
}

/// Names `create-nodes` materialises: `<type>-1 ..= <type>-<count>`.
pub fn declared_node_names(declared: &[NodeTypeConfig]) -> Vec<(&NodeTypeConfig, String)> {
    declared
        .iter()
        .flat_map(|t| (1..=t.count).map(move |i| (t, compose_node_name(&t.name, i))))
        .collect()
}

/// The gathered view of the cluster for one operation.
///
/// Built once, then only borrowed while work items are acted on.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<NodeRecord>,
}

impl Topology {
    pub fn new(nodes: Vec<NodeRecord>) -> Self {
        Self { nodes }
    }

    pub fn from_live(declared: &[NodeTypeConfig], live: &[LiveInstance]) -> Self {
        Self::new(match_nodes(declared, live))
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn find(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a NodeRecord> + 'a {
        self.nodes.iter().filter(move |n| n.type_name() == type_name)
    }

    /// Matched record count per declared type, including types with none.
    pub fn count_by_type(&self, declared: &[NodeTypeConfig]) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            declared.iter().map(|t| (t.name.clone(), 0)).collect();
        for node in &self.nodes {
            *counts.entry(node.type_name().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn into_nodes(self) -> Vec<NodeRecord> {
        self.nodes
    }
}

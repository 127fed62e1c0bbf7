//! Live-state and request types shared across Stratus crates.
//!
//! Everything here is a per-invocation snapshot: nothing is persisted,
//! every operation re-queries the provider.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::NodeTypeConfig;

// ── Compute ───────────────────────────────────────────────────────

/// A server as reported by the compute provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveInstance {
    pub id: String,
    pub name: String,
    /// Address used to reach the node; empty while the provider has not
    /// assigned one yet.
    pub address: String,
    pub status: String,
}

/// A live instance joined with the node type it was declared as.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub index: u32,
    pub node_type: Arc<NodeTypeConfig>,
}

impl NodeRecord {
    pub fn type_name(&self) -> &str {
        &self.node_type.name
    }
}

/// Request to create one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub image_ref: String,
    pub flavor_ref: String,
    /// Provider-side (cluster-prefixed) security group names.
    pub security_groups: Vec<String>,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
    pub availability_zone: Option<String>,
}

// ── Network ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSecurityGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: Vec<LiveRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRule {
    pub id: String,
    pub direction: String,
    pub ethertype: String,
    pub protocol: Option<String>,
    pub port_range_min: Option<u16>,
    pub port_range_max: Option<u16>,
    pub remote_ip_prefix: Option<String>,
}

/// A concrete security rule ready to be created on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRuleRequest {
    pub security_group_id: String,
    pub direction: String,
    pub ethertype: String,
    pub protocol: Option<String>,
    pub port_range_min: Option<u16>,
    pub port_range_max: Option<u16>,
    pub remote_ip_prefix: String,
}

// ── Block storage ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub size: u32,
    pub volume_type: Option<String>,
    pub description: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveVolume {
    pub id: String,
    pub name: String,
    pub status: String,
    pub size: u32,
    /// Server ids the volume is attached to.
    pub attached_to: Vec<String>,
}

// ── Container runtime ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveContainer {
    pub id: String,
    /// Image reference the container was created from.
    pub image: String,
    pub status: String,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveImage {
    pub id: String,
    pub repo_tags: Vec<String>,
}

impl LiveImage {
    /// First tag, or the id for untagged images.
    pub fn reference(&self) -> &str {
        self.repo_tags.first().map(String::as_str).unwrap_or(&self.id)
    }
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub image: String,
    pub cmd: Vec<String>,
    pub create_options: serde_json::Value,
    pub start_options: serde_json::Value,
}

// ── Name resolution ───────────────────────────────────────────────

/// One `name -> address` entry injected into a container's hosts file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    pub address: String,
}

impl HostEntry {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// `alias` resolves to whatever address `target` has in the hosts table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub alias: String,
    pub target: String,
}

impl AliasEntry {
    /// Parse `alias:target`. The target's host part is the text before
    /// any further `:`.
    pub fn parse(spec: &str) -> Option<Self> {
        let (alias, target) = spec.split_once(':')?;
        let target = target.split(':').next().unwrap_or(target);
        if alias.is_empty() || target.is_empty() {
            return None;
        }
        Some(Self {
            alias: alias.to_string(),
            target: target.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_parse() {
        assert_eq!(
            AliasEntry::parse("front:web-1"),
            Some(AliasEntry {
                alias: "front".to_string(),
                target: "web-1".to_string()
            })
        );
        assert_eq!(AliasEntry::parse("front:web-1:8080").unwrap().target, "web-1");
        assert_eq!(AliasEntry::parse("front"), None);
        assert_eq!(AliasEntry::parse(":web-1"), None);
    }

    #[test]
    fn live_image_reference_falls_back_to_id() {
        let tagged = LiveImage {
            id: "sha256:1".to_string(),
            repo_tags: vec!["nginx:1.25".to_string()],
        };
        let untagged = LiveImage {
            id: "sha256:2".to_string(),
            repo_tags: Vec::new(),
        };
        assert_eq!(tagged.reference(), "nginx:1.25");
        assert_eq!(untagged.reference(), "sha256:2");
    }
}

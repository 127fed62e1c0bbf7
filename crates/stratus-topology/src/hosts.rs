//! Hosts table for inter-node name resolution.
//!
//! Containers get every node of the cluster as an extra host, plus a
//! `dockerhost` entry pointing at the node they run on. `add-hosts`
//! renders the same table into `/etc/hosts` lines.

use serde_json::{Value, json};
use tracing::warn;

use stratus_core::config::RunOptions;
use stratus_core::{AliasEntry, HostEntry, NodeRecord};

/// Name of the entry that resolves to the container's own node.
pub const DOCKER_HOST: &str = "dockerhost";

/// Network mode in which a container shares its node's network stack.
pub const HOST_NETWORK_MODE: &str = "host";

/// `{name, address}` of every matched node, gathered once per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostsTable {
    nodes: Vec<HostEntry>,
}

impl HostsTable {
    pub fn from_nodes(nodes: &[NodeRecord]) -> Self {
        Self {
            nodes: nodes
                .iter()
                .map(|n| HostEntry::new(&n.name, &n.address))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[HostEntry] {
        &self.nodes
    }

    /// Entries for a container with `run` options on the node at
    /// `current_address`.
    pub fn for_container(&self, current_address: &str, run: &RunOptions) -> Vec<HostEntry> {
        self.build(
            current_address,
            run.hostname(),
            run.network_mode(),
            &run.host_aliases,
        )
    }

    /// Build the table for one container.
    ///
    /// Empty in host network mode. Otherwise the cluster nodes, then
    /// `dockerhost`, then the hostname override, then resolved aliases.
    /// Alias targets name cluster nodes only; an alias whose target is not
    /// a node is dropped.
    pub fn build(
        &self,
        current_address: &str,
        hostname: Option<&str>,
        network_mode: Option<&str>,
        aliases: &[String],
    ) -> Vec<HostEntry> {
        if network_mode.is_some_and(|m| m.eq_ignore_ascii_case(HOST_NETWORK_MODE)) {
            return Vec::new();
        }

        let mut entries = self.nodes.clone();
        entries.push(HostEntry::new(DOCKER_HOST, current_address));
        if let Some(hostname) = hostname.filter(|h| !h.is_empty()) {
            entries.push(HostEntry::new(hostname, current_address));
        }

        for spec in aliases {
            let Some(alias) = AliasEntry::parse(spec) else {
                warn!(alias = %spec, "malformed host alias, expected alias:target");
                continue;
            };
            let resolved = self
                .nodes
                .iter()
                .find(|e| e.name == alias.target)
                .map(|e| e.address.clone());
            match resolved {
                Some(address) => entries.push(HostEntry::new(alias.alias, address)),
                None => {
                    warn!(alias = %alias.alias, target = %alias.target, "host alias target not found, dropping alias");
                }
            }
        }
        entries
    }
}

/// Free-standing form of [`HostsTable::build`].
pub fn build_hosts(
    nodes: &[NodeRecord],
    aliases: &[String],
    current_address: &str,
    hostname: Option<&str>,
    network_mode: Option<&str>,
) -> Vec<HostEntry> {
    HostsTable::from_nodes(nodes).build(current_address, hostname, network_mode, aliases)
}

/// `name:address` strings, the form container runtimes take.
pub fn to_extra_hosts(entries: &[HostEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| format!("{}:{}", e.name, e.address))
        .collect()
}

/// `address name` lines for a hosts file.
pub fn hosts_file_lines(entries: &[HostEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| format!("{} {}", e.address, e.name))
        .collect()
}

/// Copy of `create` options with `HostConfig.ExtraHosts` set to `entries`.
///
/// Extra hosts already present in the template are kept in front.
pub fn with_extra_hosts(create: &Value, entries: &[HostEntry]) -> Value {
    let mut create = match create {
        Value::Object(_) => create.clone(),
        _ => json!({}),
    };
    if entries.is_empty() {
        return create;
    }

    let extra = to_extra_hosts(entries).into_iter().map(Value::String);
    if let Some(object) = create.as_object_mut() {
        let host_config = object
            .entry("HostConfig")
            .or_insert_with(|| json!({}));
        if !host_config.is_object() {
            *host_config = json!({});
        }
        if let Some(host_config) = host_config.as_object_mut() {
            let hosts = host_config
                .entry("ExtraHosts")
                .or_insert_with(|| Value::Array(Vec::new()));
            match hosts.as_array_mut() {
                Some(existing) => existing.extend(extra),
                None => *hosts = Value::Array(extra.collect()),
            }
        }
    }
    create
}

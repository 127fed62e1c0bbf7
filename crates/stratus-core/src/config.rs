//! stratus.toml cluster description parser.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::naming::SEPARATOR;

/// Environment variable that supplies the provider password when the
/// config file leaves it out.
pub const PASSWORD_ENV: &str = "OS_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster: ClusterSection,
    pub provider: ProviderConfig,
    pub ssh: Option<SshConfig>,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub node_types: Vec<NodeTypeConfig>,
    #[serde(default)]
    pub security_groups: BTreeMap<String, SecurityGroupConfig>,
    #[serde(default)]
    pub volume_types: Vec<VolumeTypeConfig>,
    #[serde(default)]
    pub images: BTreeMap<String, ImageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    pub name: String,
}

/// Compute/network/block-storage provider credentials and placement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub auth_url: String,
    pub username: String,
    pub password: Option<String>,
    pub project_name: String,
    #[serde(default = "default_domain")]
    pub user_domain: String,
    #[serde(default = "default_domain")]
    pub project_domain: String,
    pub region: Option<String>,
    pub availability_zone: Option<String>,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
    /// Network whose address identifies a node. First IPv4 address otherwise.
    pub network: Option<String>,
}

fn default_domain() -> String {
    "Default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub username: String,
    pub private_key_file: PathBuf,
}

/// How the container runtime on each node is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

fn default_docker_port() -> u16 {
    2375
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            port: default_docker_port(),
            protocol: Protocol::Http,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// A declared node type. `count` instances named `<name>-1..=<name>-<count>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeTypeConfig {
    pub name: String,
    pub count: u32,
    pub image_ref: String,
    pub flavor_ref: String,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
    #[serde(default)]
    pub copy_to_host: Vec<CopyStep>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityGroupConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<RuleTemplate>,
}

/// A security rule that may reference node addresses by node type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleTemplate {
    pub direction: String,
    #[serde(default = "default_ethertype")]
    pub ethertype: String,
    pub protocol: Option<String>,
    pub port_range_min: Option<u16>,
    pub port_range_max: Option<u16>,
    pub remote_ip_prefix: Option<String>,
    pub remote_ip_node_prefixes: Option<Vec<String>>,
}

fn default_ethertype() -> String {
    "IPv4".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeTypeConfig {
    pub name: String,
    /// Size in GB.
    pub size: u32,
    pub volume_type: Option<String>,
    pub description: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    pub repo: String,
    pub auth: Option<RegistryAuth>,
    #[serde(default)]
    pub run: RunOptions,
}

/// Registry credentials forwarded to the runtime when pulling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub serveraddress: Option<String>,
}

/// Container create/start options, passed through to the runtime as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOptions {
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default = "empty_object")]
    pub create: serde_json::Value,
    #[serde(default = "empty_object")]
    pub start: serde_json::Value,
    /// `alias:target` pairs resolved against the cluster hosts table.
    #[serde(default)]
    pub host_aliases: Vec<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cmd: Vec::new(),
            create: empty_object(),
            start: empty_object(),
            host_aliases: Vec::new(),
        }
    }
}

impl RunOptions {
    /// `HostConfig.NetworkMode` of the create options.
    pub fn network_mode(&self) -> Option<&str> {
        self.create
            .get("HostConfig")
            .and_then(|h| h.get("NetworkMode"))
            .and_then(|m| m.as_str())
    }

    /// `Hostname` override of the create options.
    pub fn hostname(&self) -> Option<&str> {
        self.create.get("Hostname").and_then(|h| h.as_str())
    }
}

/// HTTP reachability test run against a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    pub auth: Option<BasicAuth>,
    pub should_start_with: Option<String>,
    pub should_contain: Option<String>,
    /// Optional per-test deadline, e.g. "5s" or "500ms".
    pub timeout: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// One local path copied to a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopyStep {
    pub from: PathBuf,
    pub to: String,
}

impl ClusterConfig {
    /// Read, parse, fill secrets from the environment, and validate.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env(std::env::var(PASSWORD_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Fill the provider password from the environment if the file omits it.
    pub fn apply_env(&mut self, password: Option<String>) {
        if self.provider.password.is_none() {
            self.provider.password = password;
        }
    }

    /// Check the cross-references and naming constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cluster.name.trim().is_empty() {
            return Err(ConfigError::Missing("cluster.name".to_string()));
        }
        check_separator(&self.cluster.name, "cluster.name")?;

        for group in self.security_groups.keys() {
            check_separator(group, "security_groups")?;
        }

        let mut seen = HashSet::new();
        for node_type in &self.node_types {
            if node_type.name.is_empty() {
                return Err(ConfigError::Missing("node_types.name".to_string()));
            }
            if !seen.insert(node_type.name.as_str()) {
                return Err(ConfigError::DuplicateNodeType(node_type.name.clone()));
            }
            for group in &node_type.security_groups {
                if !self.security_groups.contains_key(group) {
                    return Err(unknown(node_type, "security group", group));
                }
            }
            for image in &node_type.images {
                if !self.images.contains_key(image) {
                    return Err(unknown(node_type, "image", image));
                }
            }
            for volume in &node_type.volumes {
                if self.volume_type(volume).is_none() {
                    return Err(unknown(node_type, "volume type", volume));
                }
            }
            for test in &node_type.tests {
                if let Some(timeout) = &test.timeout {
                    if parse_duration(timeout).is_none() {
                        return Err(ConfigError::Invalid {
                            field: format!("{}.tests.{}.timeout", node_type.name, test.name),
                            reason: format!("unrecognised duration '{timeout}'"),
                        });
                    }
                }
            }
        }

        for (group_name, group) in &self.security_groups {
            for rule in &group.rules {
                for prefix in rule.remote_ip_node_prefixes.iter().flatten() {
                    if self.node_type(prefix).is_none() {
                        return Err(ConfigError::Invalid {
                            field: format!("security_groups.{group_name}.rules"),
                            reason: format!("remote_ip_node_prefixes names undeclared node type '{prefix}'"),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub fn node_type(&self, name: &str) -> Option<&NodeTypeConfig> {
        self.node_types.iter().find(|t| t.name == name)
    }

    pub fn volume_type(&self, name: &str) -> Option<&VolumeTypeConfig> {
        self.volume_types.iter().find(|v| v.name == name)
    }

    pub fn image(&self, name: &str) -> Option<&ImageConfig> {
        self.images.get(name)
    }

    pub fn security_group(&self, name: &str) -> Option<&SecurityGroupConfig> {
        self.security_groups.get(name)
    }

    /// Scaffold a minimal stratus.toml for a new cluster.
    pub fn scaffold(cluster: &str) -> Self {
        let mut security_groups = BTreeMap::new();
        security_groups.insert(
            "internal".to_string(),
            SecurityGroupConfig {
                description: "traffic between cluster nodes".to_string(),
                rules: vec![RuleTemplate {
                    direction: "ingress".to_string(),
                    ethertype: default_ethertype(),
                    protocol: Some("tcp".to_string()),
                    port_range_min: Some(1),
                    port_range_max: Some(65535),
                    remote_ip_prefix: None,
                    remote_ip_node_prefixes: Some(vec!["node".to_string()]),
                }],
            },
        );

        ClusterConfig {
            cluster: ClusterSection {
                name: cluster.to_string(),
            },
            provider: ProviderConfig {
                auth_url: "https://keystone.example.org:5000/v3".to_string(),
                username: "changeme".to_string(),
                password: None,
                project_name: "changeme".to_string(),
                user_domain: default_domain(),
                project_domain: default_domain(),
                ..Default::default()
            },
            ssh: None,
            docker: DockerConfig::default(),
            node_types: vec![NodeTypeConfig {
                name: "node".to_string(),
                count: 1,
                image_ref: "changeme".to_string(),
                flavor_ref: "changeme".to_string(),
                security_groups: vec!["internal".to_string()],
                ..Default::default()
            }],
            security_groups,
            volume_types: Vec::new(),
            images: BTreeMap::new(),
        }
    }
}

fn check_separator(name: &str, context: &str) -> ConfigResult<()> {
    if name.contains(SEPARATOR) {
        return Err(ConfigError::Separator {
            name: name.to_string(),
            context: context.to_string(),
            separator: SEPARATOR,
        });
    }
    Ok(())
}

fn unknown(node_type: &NodeTypeConfig, kind: &'static str, name: &str) -> ConfigError {
    ConfigError::UnknownReference {
        node_type: node_type.name.clone(),
        kind,
        name: name.to_string(),
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<std::time::Duration> {
    use std::time::Duration;

    let s = s.trim();
    if let Some(n) = s.strip_suffix("ms") {
        n.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(n) = s.strip_suffix('s') {
        n.trim().parse().ok().map(Duration::from_secs)
    } else if let Some(n) = s.strip_suffix('m') {
        let minutes: u64 = n.trim().parse().ok()?;
        minutes.checked_mul(60).map(Duration::from_secs)
    } else {
        s.parse().ok().map(Duration::from_secs)
    }
}

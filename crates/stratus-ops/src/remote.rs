//! Operations that reach into the nodes themselves over ssh:
//! `copy-to-host` and `add-hosts`.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use stratus_core::NodeRecord;
use stratus_core::config::{CopyStep, SshConfig};
use stratus_fanout::{FailurePolicy, run_grouped};
use stratus_topology::{HostsTable, hosts_file_lines};

use crate::context::Cluster;
use crate::error::{OpsError, OpsResult};
use crate::settle;

const HOST_KEY_OPTION: [&str; 2] = ["-o", "StrictHostKeyChecking=no"];
const STAGED_HOSTS: &str = "/tmp/hosts";

/// Command execution on a node.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Copy a local file or directory to `to` on the node.
    async fn copy(&self, node: &NodeRecord, from: &Path, to: &str) -> OpsResult<()>;
    /// Run one shell command on the node.
    async fn exec(&self, node: &NodeRecord, command: &str) -> OpsResult<()>;
}

/// [`RemoteShell`] backed by the local `ssh` and `scp` binaries.
#[derive(Debug, Clone)]
pub struct SshShell {
    username: String,
    private_key_file: PathBuf,
}

impl SshShell {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            username: config.username.clone(),
            private_key_file: config.private_key_file.clone(),
        }
    }

    fn destination(&self, node: &NodeRecord) -> String {
        format!("{}@{}", self.username, node.address)
    }

    pub fn scp_args(&self, node: &NodeRecord, from: &Path, to: &str, recursive: bool) -> Vec<String> {
        let mut args = Vec::new();
        if recursive {
            args.push("-r".to_string());
        }
        args.extend(HOST_KEY_OPTION.map(String::from));
        args.push("-i".to_string());
        args.push(self.private_key_file.display().to_string());
        args.push(from.display().to_string());
        args.push(format!("{}:{to}", self.destination(node)));
        args
    }

    pub fn ssh_args(&self, node: &NodeRecord, command: &str) -> Vec<String> {
        let mut args: Vec<String> = HOST_KEY_OPTION.map(String::from).into();
        args.push("-i".to_string());
        args.push(self.private_key_file.display().to_string());
        args.push(self.destination(node));
        args.push(command.to_string());
        args
    }
}

async fn invoke(program: &'static str, node: &NodeRecord, args: &[String]) -> OpsResult<()> {
    debug!(program, node = %node.name, ?args, "spawning");
    let output: Output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| OpsError::Spawn { program, source })?;

    if output.status.success() {
        return Ok(());
    }
    Err(OpsError::Remote {
        program,
        node: node.name.clone(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn copy(&self, node: &NodeRecord, from: &Path, to: &str) -> OpsResult<()> {
        let recursive = tokio::fs::metadata(from).await?.is_dir();
        invoke("scp", node, &self.scp_args(node, from, to, recursive)).await
    }

    async fn exec(&self, node: &NodeRecord, command: &str) -> OpsResult<()> {
        invoke("ssh", node, &self.ssh_args(node, command)).await
    }
}

/// Copy every node's `copy_to_host` steps to it over scp.
///
/// Nodes are handled concurrently. Under [`FailurePolicy::AbortEmbedded`]
/// a node's steps run in declaration order and a failed copy skips the
/// node's remaining steps.
pub async fn copy_to_host(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let shell = cluster.shell()?;
    let topology = cluster.topology().await?;

    let groups: Vec<(&NodeRecord, Vec<CopyStep>)> = topology
        .nodes()
        .iter()
        .filter(|node| !node.node_type.copy_to_host.is_empty())
        .map(|node| (node, node.node_type.copy_to_host.clone()))
        .collect();
    info!(nodes = groups.len(), "copying files to hosts");

    let report = run_grouped(groups, policy, |node, step| {
        let node = *node;
        async move {
            shell
                .copy(node, &step.from, &step.to)
                .await
                .inspect(|_| info!(node = %node.name, from = %step.from.display(), to = %step.to, "copied"))
                .inspect_err(|e| error!(node = %node.name, from = %step.from.display(), error = %e, "copy failed"))
        }
    })
    .await;
    settle("copy-to-host", [report])
}

/// Steps that install the cluster's hosts lines on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostsStep {
    /// Stage the cluster lines followed by the node's current hosts file.
    Stage(Vec<String>),
    /// Replace `/etc/hosts` with the staged file.
    Install,
}

impl HostsStep {
    pub fn command(&self) -> String {
        match self {
            HostsStep::Stage(lines) => {
                let quoted: Vec<String> = lines.iter().map(|l| shell_quote(l)).collect();
                format!(
                    "printf '%s\\n' {} > {STAGED_HOSTS} && cat /etc/hosts >> {STAGED_HOSTS}",
                    quoted.join(" ")
                )
            }
            HostsStep::Install => format!("sudo cp {STAGED_HOSTS} /etc/hosts"),
        }
    }
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Prepend an `address name` line for every cluster node to each node's
/// `/etc/hosts`.
///
/// The lines come from the complete topology, gathered before any node is
/// touched. Each node gets a [`HostsStep::Stage`] then a
/// [`HostsStep::Install`]; run them with [`FailurePolicy::AbortEmbedded`]
/// so a failed stage never installs.
pub async fn add_hosts(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let shell = cluster.shell()?;
    let topology = cluster.topology().await?;
    let lines = hosts_file_lines(HostsTable::from_nodes(topology.nodes()).entries());
    if lines.is_empty() {
        info!("no nodes to add to hosts files");
        return Ok(());
    }

    let groups = topology
        .nodes()
        .iter()
        .map(|node| (node, vec![HostsStep::Stage(lines.clone()), HostsStep::Install]));

    let report = run_grouped(groups, policy, |node, step| {
        let node = *node;
        async move {
            shell
                .exec(node, &step.command())
                .await
                .inspect_err(|e| error!(node = %node.name, error = %e, "updating hosts file failed"))
        }
    })
    .await;
    settle("add-hosts", [report])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::{RecordingShell, cluster_with, config};
    use stratus_core::config::NodeTypeConfig;
    use stratus_provider::memory::MemoryCloud;

    fn node() -> NodeRecord {
        NodeRecord {
            id: "id-web-1".to_string(),
            name: "web-1".to_string(),
            address: "10.0.0.1".to_string(),
            index: 1,
            node_type: Arc::new(NodeTypeConfig {
                name: "web".to_string(),
                ..Default::default()
            }),
        }
    }

    fn shell() -> SshShell {
        SshShell::new(&SshConfig {
            username: "ubuntu".to_string(),
            private_key_file: PathBuf::from("/keys/id_rsa"),
        })
    }

    #[test]
    fn scp_arguments() {
        let args = shell().scp_args(&node(), Path::new("conf/app.toml"), "/etc/app.toml", false);
        assert_eq!(
            args,
            vec![
                "-o",
                "StrictHostKeyChecking=no",
                "-i",
                "/keys/id_rsa",
                "conf/app.toml",
                "ubuntu@10.0.0.1:/etc/app.toml"
            ]
        );

        let args = shell().scp_args(&node(), Path::new("conf"), "/opt/conf", true);
        assert_eq!(args[0], "-r");
    }

    #[test]
    fn ssh_arguments() {
        let args = shell().ssh_args(&node(), "uptime");
        assert_eq!(
            args,
            vec!["-o", "StrictHostKeyChecking=no", "-i", "/keys/id_rsa", "ubuntu@10.0.0.1", "uptime"]
        );
    }

    #[test]
    fn hosts_steps_render_commands() {
        let stage = HostsStep::Stage(vec!["10.0.0.1 web-1".to_string(), "10.0.0.2 web-2".to_string()]);
        assert_eq!(
            stage.command(),
            "printf '%s\\n' '10.0.0.1 web-1' '10.0.0.2 web-2' > /tmp/hosts && cat /etc/hosts >> /tmp/hosts"
        );
        assert_eq!(HostsStep::Install.command(), "sudo cp /tmp/hosts /etc/hosts");
    }

    #[test]
    fn hosts_lines_with_quotes_stay_one_word() {
        let stage = HostsStep::Stage(vec!["10.0.0.1 o'brien".to_string()]);
        assert_eq!(
            stage.command(),
            r"printf '%s\n' '10.0.0.1 o'\''brien' > /tmp/hosts && cat /etc/hosts >> /tmp/hosts"
        );
    }

    #[tokio::test]
    async fn copy_of_a_missing_source_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = shell().copy(&node(), &missing, "/tmp/x").await.unwrap_err();
        assert!(matches!(err, OpsError::Io(_)));
    }

    #[tokio::test]
    async fn copy_steps_run_in_order_and_stop_per_node() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_instance("web-1", "10.0.0.1");
        cloud.add_instance("web-2", "10.0.0.2");
        cloud.add_instance("db-1", "10.0.0.3");

        let mut config = config();
        config.node_types[0].copy_to_host = vec![
            CopyStep {
                from: PathBuf::from("a.conf"),
                to: "/etc/a.conf".to_string(),
            },
            CopyStep {
                from: PathBuf::from("b.conf"),
                to: "/etc/b.conf".to_string(),
            },
        ];
        let shell = Arc::new(RecordingShell::failing_on("copy web-1 a.conf"));
        let cluster = cluster_with(config, cloud).with_shell(shell.clone());

        let err = copy_to_host(&cluster, FailurePolicy::AbortEmbedded).await.unwrap_err();
        assert!(matches!(err, OpsError::Remote { .. }));

        let calls = shell.calls();
        assert!(calls.contains(&"copy web-1 a.conf /etc/a.conf".to_string()));
        assert!(!calls.contains(&"copy web-1 b.conf /etc/b.conf".to_string()));
        assert!(calls.contains(&"copy web-2 a.conf /etc/a.conf".to_string()));
        assert!(calls.contains(&"copy web-2 b.conf /etc/b.conf".to_string()));
        assert!(calls.iter().all(|c| !c.contains("db-1")));
    }

    #[tokio::test]
    async fn add_hosts_stages_then_installs_on_every_node() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_instance("web-1", "10.0.0.1");
        cloud.add_instance("db-1", "10.0.0.3");

        let shell = Arc::new(RecordingShell::default());
        let cluster = cluster_with(config(), cloud).with_shell(shell.clone());
        add_hosts(&cluster, FailurePolicy::AbortEmbedded).await.unwrap();

        let calls = shell.calls();
        assert_eq!(calls.len(), 4);
        let on_db: Vec<_> = calls.iter().filter(|c| c.starts_with("exec db-1 ")).collect();
        assert!(on_db[0].contains("'10.0.0.1 web-1' '10.0.0.3 db-1' > /tmp/hosts"));
        assert_eq!(on_db[1], "exec db-1 sudo cp /tmp/hosts /etc/hosts");
    }

    #[tokio::test]
    async fn remote_operations_need_an_ssh_section() {
        let cluster = cluster_with(config(), Arc::new(MemoryCloud::new()));
        assert!(matches!(add_hosts(&cluster, FailurePolicy::AbortEmbedded).await, Err(OpsError::MissingSection("ssh"))));
    }
}

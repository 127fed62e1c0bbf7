//! The closed set of operations Stratus runs, each with its failure
//! policy.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::info;

use stratus_core::{LiveContainer, LiveSecurityGroup, LiveVolume, NodeRecord};
use stratus_fanout::FailurePolicy;

use crate::containers::{self, ContainerAction};
use crate::context::Cluster;
use crate::error::{OpsError, OpsResult};
use crate::testing::TestSummary;
use crate::{nodes, remote, security_groups, testing, volumes};

/// One container as listed by `list-containers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeContainer {
    pub node: String,
    pub address: String,
    pub container: LiveContainer,
}

/// What an operation hands back for display.
#[derive(Debug)]
pub enum Listing {
    None,
    Nodes(Vec<NodeRecord>),
    SecurityGroups(Vec<LiveSecurityGroup>),
    Volumes(Vec<LiveVolume>),
    Containers(Vec<NodeContainer>),
    Tests(TestSummary),
}

/// Every batch operation, one per CLI subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListNodes,
    CreateNodes,
    DestroyNodes,
    ListSecurityGroups,
    CreateSecurityGroups,
    DestroySecurityGroups,
    UpdateSecurityGroups,
    CreateVolumes,
    ListVolumes,
    AttachVolumes,
    DetachVolumes,
    DestroyVolumes,
    CopyToHost,
    AddHosts,
    Pull,
    Run,
    ListContainers,
    Start,
    Stop,
    Remove,
    RemoveImages,
    Test,
}

impl Operation {
    /// Declaration order, which is also the CLI help order.
    pub const ALL: [Operation; 22] = [
        Operation::ListNodes,
        Operation::CreateNodes,
        Operation::DestroyNodes,
        Operation::ListSecurityGroups,
        Operation::CreateSecurityGroups,
        Operation::DestroySecurityGroups,
        Operation::UpdateSecurityGroups,
        Operation::CreateVolumes,
        Operation::ListVolumes,
        Operation::AttachVolumes,
        Operation::DetachVolumes,
        Operation::DestroyVolumes,
        Operation::CopyToHost,
        Operation::AddHosts,
        Operation::Pull,
        Operation::Run,
        Operation::ListContainers,
        Operation::Start,
        Operation::Stop,
        Operation::Remove,
        Operation::RemoveImages,
        Operation::Test,
    ];

    /// Kebab-case name, as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ListNodes => "list-nodes",
            Operation::CreateNodes => "create-nodes",
            Operation::DestroyNodes => "destroy-nodes",
            Operation::ListSecurityGroups => "list-security-groups",
            Operation::CreateSecurityGroups => "create-security-groups",
            Operation::DestroySecurityGroups => "destroy-security-groups",
            Operation::UpdateSecurityGroups => "update-security-groups",
            Operation::CreateVolumes => "create-volumes",
            Operation::ListVolumes => "list-volumes",
            Operation::AttachVolumes => "attach-volumes",
            Operation::DetachVolumes => "detach-volumes",
            Operation::DestroyVolumes => "destroy-volumes",
            Operation::CopyToHost => "copy-to-host",
            Operation::AddHosts => "add-hosts",
            Operation::Pull => "pull",
            Operation::Run => "run",
            Operation::ListContainers => "list-containers",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Remove => "remove",
            Operation::RemoveImages => "remove-images",
            Operation::Test => "test",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Operation::ListNodes => "List the cluster's nodes",
            Operation::CreateNodes => "Create every declared node",
            Operation::DestroyNodes => "Destroy the cluster's nodes",
            Operation::ListSecurityGroups => "List the cluster's security groups",
            Operation::CreateSecurityGroups => "Create the declared security groups",
            Operation::DestroySecurityGroups => "Destroy the cluster's security groups",
            Operation::UpdateSecurityGroups => "Add rules to the security groups from node addresses",
            Operation::CreateVolumes => "Create each node's declared volumes",
            Operation::ListVolumes => "List the cluster's volumes",
            Operation::AttachVolumes => "Attach each node's volumes",
            Operation::DetachVolumes => "Detach each node's volumes",
            Operation::DestroyVolumes => "Destroy the cluster's volumes",
            Operation::CopyToHost => "Copy files to the nodes over scp",
            Operation::AddHosts => "Add every cluster node to each node's /etc/hosts",
            Operation::Pull => "Pull each node's images",
            Operation::Run => "Create and start each node's containers",
            Operation::ListContainers => "List containers on every node",
            Operation::Start => "Start containers",
            Operation::Stop => "Stop containers",
            Operation::Remove => "Remove containers",
            Operation::RemoveImages => "Remove images from the nodes",
            Operation::Test => "Run the nodes' reachability tests",
        }
    }

    /// How a failing item affects the rest of the batch.
    ///
    /// [`Operation::execute`] hands this to the operation. Ordered per-node
    /// step lists stop at their first failure; everything else attempts
    /// every item.
    pub fn policy(&self) -> FailurePolicy {
        match self {
            Operation::CopyToHost | Operation::AddHosts | Operation::Test => {
                FailurePolicy::AbortEmbedded
            }
            _ => FailurePolicy::ContinueOnError,
        }
    }

    /// Run the operation against `cluster` under [`Operation::policy`].
    ///
    /// Listing operations hand back what they found; the others return
    /// [`Listing::None`] once every item has been attempted, or the first
    /// captured failure.
    pub async fn execute(self, cluster: &Cluster) -> OpsResult<Listing> {
        info!(operation = self.name(), policy = self.policy().label(), "starting");
        let policy = self.policy();
        let listing = match self {
            Operation::ListNodes => Listing::Nodes(nodes::list_nodes(cluster).await?),
            Operation::CreateNodes => {
                nodes::create_nodes(cluster, policy).await?;
                Listing::None
            }
            Operation::DestroyNodes => {
                nodes::destroy_nodes(cluster, policy).await?;
                Listing::None
            }
            Operation::ListSecurityGroups => {
                Listing::SecurityGroups(security_groups::list_security_groups(cluster).await?)
            }
            Operation::CreateSecurityGroups => {
                security_groups::create_security_groups(cluster, policy).await?;
                Listing::None
            }
            Operation::DestroySecurityGroups => {
                security_groups::destroy_security_groups(cluster, policy).await?;
                Listing::None
            }
            Operation::UpdateSecurityGroups => {
                security_groups::update_security_groups(cluster, policy).await?;
                Listing::None
            }
            Operation::CreateVolumes => {
                volumes::create_volumes(cluster, policy).await?;
                Listing::None
            }
            Operation::ListVolumes => Listing::Volumes(volumes::list_volumes(cluster).await?),
            Operation::AttachVolumes => {
                volumes::attach_volumes(cluster, policy).await?;
                Listing::None
            }
            Operation::DetachVolumes => {
                volumes::detach_volumes(cluster, policy).await?;
                Listing::None
            }
            Operation::DestroyVolumes => {
                volumes::destroy_volumes(cluster, policy).await?;
                Listing::None
            }
            Operation::CopyToHost => {
                remote::copy_to_host(cluster, policy).await?;
                Listing::None
            }
            Operation::AddHosts => {
                remote::add_hosts(cluster, policy).await?;
                Listing::None
            }
            Operation::Pull => {
                containers::pull(cluster, policy).await?;
                Listing::None
            }
            Operation::Run => {
                containers::run_containers(cluster, policy).await?;
                Listing::None
            }
            Operation::ListContainers => {
                Listing::Containers(containers::list_containers(cluster).await?)
            }
            Operation::Start => {
                containers::manage_containers(cluster, ContainerAction::Start, policy).await?;
                Listing::None
            }
            Operation::Stop => {
                containers::manage_containers(cluster, ContainerAction::Stop, policy).await?;
                Listing::None
            }
            Operation::Remove => {
                containers::manage_containers(cluster, ContainerAction::Remove, policy).await?;
                Listing::None
            }
            Operation::RemoveImages => {
                containers::remove_images(cluster, policy).await?;
                Listing::None
            }
            Operation::Test => Listing::Tests(testing::run_tests(cluster, policy).await?),
        };
        Ok(listing)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| OpsError::UnknownOperation(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::{RecordingShell, cluster_with, config};
    use stratus_core::config::CopyStep;
    use stratus_provider::memory::MemoryCloud;

    #[test]
    fn names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>().unwrap(), op);
            assert!(!op.description().is_empty());
        }
        assert!(matches!(
            "deploy".parse::<Operation>(),
            Err(OpsError::UnknownOperation(name)) if name == "deploy"
        ));
    }

    #[test]
    fn ordered_step_operations_abort_per_node() {
        let aborting: Vec<_> = Operation::ALL
            .into_iter()
            .filter(|op| op.policy() == FailurePolicy::AbortEmbedded)
            .collect();
        assert_eq!(
            aborting,
            vec![Operation::CopyToHost, Operation::AddHosts, Operation::Test]
        );
    }

    #[tokio::test]
    async fn execute_returns_listings() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_instance("web-1", "10.0.0.1");
        cloud.add_instance("mail", "10.0.0.8");
        let cluster = cluster_with(config(), cloud);

        match Operation::ListNodes.execute(&cluster).await.unwrap() {
            Listing::Nodes(nodes) => {
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].name, "web-1");
            }
            other => panic!("unexpected listing {other:?}"),
        }
        assert!(matches!(
            Operation::CreateNodes.execute(&cluster).await.unwrap(),
            Listing::None
        ));
    }

    fn two_step_copy_cluster(shell: Arc<RecordingShell>) -> Cluster {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_instance("web-1", "10.0.0.1");
        let mut config = config();
        config.node_types[0].copy_to_host = ["a.conf", "b.conf"]
            .into_iter()
            .map(|f| CopyStep {
                from: f.into(),
                to: format!("/etc/{f}"),
            })
            .collect();
        cluster_with(config, cloud).with_shell(shell)
    }

    #[tokio::test]
    async fn execute_hands_the_policy_to_copy_steps() {
        // Aborting: the failed first copy skips the second.
        let shell = Arc::new(RecordingShell::failing_on("copy web-1 a.conf"));
        let cluster = two_step_copy_cluster(shell.clone());
        assert!(Operation::CopyToHost.execute(&cluster).await.is_err());
        assert_eq!(shell.calls(), vec!["copy web-1 a.conf /etc/a.conf"]);

        // Continuing: both steps are attempted.
        let shell = Arc::new(RecordingShell::failing_on("copy web-1 a.conf"));
        let cluster = two_step_copy_cluster(shell.clone());
        assert!(
            remote::copy_to_host(&cluster, FailurePolicy::ContinueOnError)
                .await
                .is_err()
        );
        assert_eq!(shell.calls().len(), 2);
    }

    #[tokio::test]
    async fn execute_hands_the_policy_to_add_hosts() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_instance("web-1", "10.0.0.1");
        let shell = Arc::new(RecordingShell::failing_on("exec web-1 printf"));
        let cluster = cluster_with(config(), cloud).with_shell(shell.clone());

        assert!(Operation::AddHosts.execute(&cluster).await.is_err());
        let calls = shell.calls();
        assert_eq!(calls.len(), 1, "install must not follow a failed stage: {calls:?}");
    }
}

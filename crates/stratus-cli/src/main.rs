use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stratus_ops::Operation;
use stratus_topology::ContainerFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "stratus",
    about = "Stratus — batch lifecycle for a declared cloud cluster",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Cluster configuration file.
    #[arg(short, long, global = true, default_value = "stratus.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    filter: FilterArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Restrict container operations. Each flag takes a comma-separated
/// allow-list; an omitted flag allows everything.
#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long, global = true, value_delimiter = ',')]
    node_type: Vec<String>,
    #[arg(long, global = true, value_delimiter = ',')]
    node_id: Vec<String>,
    #[arg(long, global = true, value_delimiter = ',')]
    image: Vec<String>,
    /// Container id prefixes.
    #[arg(long, global = true, value_delimiter = ',')]
    container_id: Vec<String>,
}

impl From<FilterArgs> for ContainerFilter {
    fn from(args: FilterArgs) -> Self {
        ContainerFilter {
            node_types: args.node_type,
            node_ids: args.node_id,
            image_names: args.image,
            container_ids: args.container_id,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file.
    Init {
        /// Cluster name.
        #[arg(long, default_value = "demo")]
        name: String,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// List the cluster's nodes.
    ListNodes {
        /// Print `address name` lines for a hosts file.
        #[arg(long)]
        hosts_format: bool,
    },
    /// Create every declared node.
    CreateNodes,
    /// Destroy the cluster's nodes.
    DestroyNodes,
    /// List the cluster's security groups.
    ListSecurityGroups,
    /// Create the declared security groups.
    CreateSecurityGroups,
    /// Destroy the cluster's security groups.
    DestroySecurityGroups,
    /// Add rules to the security groups from node addresses.
    UpdateSecurityGroups,
    /// Create each node's declared volumes.
    CreateVolumes,
    /// List the cluster's volumes.
    ListVolumes,
    /// Attach each node's volumes.
    AttachVolumes,
    /// Detach each node's volumes.
    DetachVolumes,
    /// Destroy the cluster's volumes.
    DestroyVolumes,
    /// Copy files to the nodes over scp.
    CopyToHost,
    /// Add every cluster node to each node's /etc/hosts.
    AddHosts,
    /// Pull each node's images.
    Pull,
    /// Create and start each node's containers.
    Run,
    /// List containers on every node.
    ListContainers,
    /// Start containers.
    Start,
    /// Stop containers.
    Stop,
    /// Remove containers.
    Remove,
    /// Remove images from the nodes.
    RemoveImages,
    /// Run the nodes' reachability tests.
    Test,
}

impl Commands {
    fn operation(&self) -> Option<Operation> {
        let op = match self {
            Commands::Init { .. } => return None,
            Commands::ListNodes { .. } => Operation::ListNodes,
            Commands::CreateNodes => Operation::CreateNodes,
            Commands::DestroyNodes => Operation::DestroyNodes,
            Commands::ListSecurityGroups => Operation::ListSecurityGroups,
            Commands::CreateSecurityGroups => Operation::CreateSecurityGroups,
            Commands::DestroySecurityGroups => Operation::DestroySecurityGroups,
            Commands::UpdateSecurityGroups => Operation::UpdateSecurityGroups,
            Commands::CreateVolumes => Operation::CreateVolumes,
            Commands::ListVolumes => Operation::ListVolumes,
            Commands::AttachVolumes => Operation::AttachVolumes,
            Commands::DetachVolumes => Operation::DetachVolumes,
            Commands::DestroyVolumes => Operation::DestroyVolumes,
            Commands::CopyToHost => Operation::CopyToHost,
            Commands::AddHosts => Operation::AddHosts,
            Commands::Pull => Operation::Pull,
            Commands::Run => Operation::Run,
            Commands::ListContainers => Operation::ListContainers,
            Commands::Start => Operation::Start,
            Commands::Stop => Operation::Stop,
            Commands::Remove => Operation::Remove,
            Commands::RemoveImages => Operation::RemoveImages,
            Commands::Test => Operation::Test,
        };
        Some(op)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info,stratus=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Commands::Init { name, force } = &cli.command {
        return commands::init::init(&cli.config, name, *force);
    }
    let operation = cli
        .command
        .operation()
        .ok_or_else(|| anyhow::anyhow!("command has no operation"))?;

    let hosts_format = matches!(cli.command, Commands::ListNodes { hosts_format: true });
    commands::ops::execute(&cli.config, cli.filter.into(), operation, hosts_format).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_has_a_subcommand() {
        use clap::CommandFactory;
        let cli = Cli::command();
        for op in Operation::ALL {
            assert!(cli.find_subcommand(op.name()).is_some(), "{op} has no subcommand");
        }
    }

    #[test]
    fn filter_flags_split_on_commas() {
        let cli = Cli::parse_from([
            "stratus",
            "--image",
            "nginx,redis",
            "stop",
            "--container-id",
            "abc",
        ]);
        assert_eq!(cli.command.operation(), Some(Operation::Stop));
        let filter: ContainerFilter = cli.filter.into();
        assert_eq!(filter.image_names, vec!["nginx", "redis"]);
        assert_eq!(filter.container_ids, vec!["abc"]);
        assert!(filter.node_types.is_empty());
    }

    #[test]
    fn hosts_format_flag() {
        let cli = Cli::parse_from(["stratus", "list-nodes", "--hosts-format"]);
        assert!(matches!(cli.command, Commands::ListNodes { hosts_format: true }));
        assert_eq!(cli.config, PathBuf::from("stratus.toml"));
    }
}

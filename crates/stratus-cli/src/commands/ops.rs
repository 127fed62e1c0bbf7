use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use stratus_core::{ClusterConfig, LiveRule};
use stratus_ops::{Cluster, Listing, Operation, Providers};
use stratus_provider::docker::DockerEngine;
use stratus_provider::http::HttpClient;
use stratus_provider::openstack::OpenStack;
use stratus_topology::ContainerFilter;

/// Load the configuration, authenticate, run `operation`, print its
/// listing.
pub async fn execute(
    config_path: &Path,
    filter: ContainerFilter,
    operation: Operation,
    hosts_format: bool,
) -> anyhow::Result<()> {
    let config = ClusterConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let http = HttpClient::with_webpki_roots()?;
    let session = Arc::new(
        OpenStack::authenticate(&config.provider, http.clone())
            .await
            .context("authenticating with the cloud provider")?,
    );
    let runtime = Arc::new(DockerEngine::new(http.clone(), &config.docker));
    info!(cluster = %config.cluster.name, operation = %operation, "provider session ready");

    let providers = Providers {
        compute: session.clone(),
        network: session.clone(),
        storage: session,
        runtime,
    };
    let cluster = Cluster::new(config, providers, http).with_filter(filter);

    let listing = operation
        .execute(&cluster)
        .await
        .with_context(|| format!("{operation} failed"))?;
    for line in render(&listing, hosts_format) {
        println!("{line}");
    }
    Ok(())
}

/// Text lines for a listing.
pub fn render(listing: &Listing, hosts_format: bool) -> Vec<String> {
    match listing {
        Listing::None => Vec::new(),
        Listing::Nodes(nodes) if hosts_format => nodes
            .iter()
            .map(|n| format!("{} {}", n.address, n.name))
            .collect(),
        Listing::Nodes(nodes) => nodes
            .iter()
            .map(|n| format!("{},{},{},{}", n.name, n.id, n.address, n.node_type.images.join(" ")))
            .collect(),
        Listing::SecurityGroups(groups) => groups
            .iter()
            .map(|g| {
                let rules: String = g.rules.iter().map(render_rule).collect();
                format!("{},{},{rules}", g.name, g.id)
            })
            .collect(),
        Listing::Volumes(volumes) => volumes
            .iter()
            .map(|v| {
                format!("{},{},{},{},{}", v.name, v.id, v.status, v.size, v.attached_to.join(" "))
            })
            .collect(),
        Listing::Containers(containers) => containers
            .iter()
            .map(|c| {
                format!(
                    "{},{},{},{},{}",
                    c.node, c.address, c.container.image, c.container.status, c.container.id
                )
            })
            .collect(),
        Listing::Tests(summary) => vec![format!(
            "{}/{} tests passed, {} failed",
            summary.passed, summary.total, summary.failed
        )],
    }
}

fn render_rule(rule: &LiveRule) -> String {
    let port = |p: Option<u16>| p.map(|p| p.to_string()).unwrap_or_default();
    format!(
        "{{{},{},{},{},{},{}}}",
        rule.protocol.as_deref().unwrap_or(""),
        rule.direction,
        rule.ethertype,
        port(rule.port_range_min),
        port(rule.port_range_max),
        rule.remote_ip_prefix.as_deref().unwrap_or("")
    )
}

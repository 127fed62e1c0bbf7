//! Security group lifecycle and rule expansion.

use tracing::{error, info};

use stratus_core::naming::plain_group_name;
use stratus_core::{LiveSecurityGroup, SecurityRuleRequest};
use stratus_fanout::{FailurePolicy, run};
use stratus_topology::expand_rules;

use crate::context::Cluster;
use crate::error::{OpsError, OpsResult};
use crate::settle;

/// Live groups carrying this cluster's name prefix.
pub async fn list_security_groups(cluster: &Cluster) -> OpsResult<Vec<LiveSecurityGroup>> {
    let groups = cluster.network().list_security_groups().await?;
    Ok(groups
        .into_iter()
        .filter(|g| plain_group_name(cluster.name(), &g.name).is_some())
        .collect())
}

/// Create one provider group per declared group.
pub async fn create_security_groups(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let declared = &cluster.config().security_groups;
    info!(count = declared.len(), "creating security groups");

    let report = run(declared, policy, |(plain, group)| async move {
        let name = cluster.group_name(plain);
        let id = cluster
            .network()
            .create_security_group(&name, &group.description)
            .await
            .inspect_err(|e| error!(group = %name, error = %e, "creating security group failed"))?;
        info!(group = %name, id = %id, "security group created");
        Ok::<_, OpsError>(())
    })
    .await;
    settle("create-security-groups", [report])
}

/// Destroy every live group carrying the cluster prefix, declared or not.
pub async fn destroy_security_groups(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let groups = list_security_groups(cluster).await?;
    info!(count = groups.len(), "destroying security groups");

    let report = run(&groups, policy, |group| async move {
        cluster
            .network()
            .destroy_security_group(&group.id)
            .await
            .inspect_err(|e| error!(group = %group.name, error = %e, "destroying security group failed"))?;
        info!(group = %group.name, "security group destroyed");
        Ok::<_, OpsError>(())
    })
    .await;
    settle("destroy-security-groups", [report])
}

/// Concrete rules for every live cluster group whose declaration is known.
///
/// Both the topology and the group listing are complete before any rule
/// is produced.
pub async fn planned_rules(cluster: &Cluster) -> OpsResult<Vec<SecurityRuleRequest>> {
    let topology = cluster.topology().await?;
    let groups = list_security_groups(cluster).await?;

    let mut rules = Vec::new();
    for group in &groups {
        let Some(plain) = plain_group_name(cluster.name(), &group.name) else {
            continue;
        };
        let Some(declared) = cluster.config().security_group(plain) else {
            info!(group = %group.name, "group not declared, no rules to add");
            continue;
        };
        let expanded = expand_rules(&group.id, &declared.rules, topology.nodes());
        info!(group = %group.name, rules = expanded.len(), "expanded rules");
        rules.extend(expanded);
    }
    Ok(rules)
}

/// Add the expanded rules to the live groups.
///
/// Rules are not compared with what the groups already hold; repeated
/// runs add the same rules again.
pub async fn update_security_groups(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<()> {
    let rules = planned_rules(cluster).await?;

    let report = run(&rules, policy, |rule| async move {
        cluster
            .network()
            .create_security_group_rule(rule)
            .await
            .inspect_err(|e| {
                error!(
                    group = %rule.security_group_id,
                    prefix = %rule.remote_ip_prefix,
                    error = %e,
                    "creating rule failed"
                )
            })?;
        Ok::<_, OpsError>(())
    })
    .await;
    settle("update-security-groups", [report])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::{cluster_with, config};
    use stratus_provider::memory::MemoryCloud;

    #[tokio::test]
    async fn listing_keeps_cluster_groups_only() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_security_group("demo-internal");
        cloud.add_security_group("other-internal");
        cloud.add_security_group("default");
        let cluster = cluster_with(config(), cloud);

        let names: Vec<_> = list_security_groups(&cluster)
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["demo-internal"]);
    }

    #[tokio::test]
    async fn create_uses_cluster_prefixed_names() {
        let cloud = Arc::new(MemoryCloud::new());
        let cluster = cluster_with(config(), cloud.clone());

        create_security_groups(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        assert_eq!(cloud.calls_with("create_security_group "), vec!["create_security_group demo-internal"]);
    }

    #[tokio::test]
    async fn update_expands_rules_from_node_addresses() {
        let cloud = Arc::new(MemoryCloud::new());
        let group_id = cloud.add_security_group("demo-internal");
        cloud.add_instance("web-1", "10.0.0.1");
        cloud.add_instance("web-2", "10.0.0.2");
        cloud.add_instance("db-1", "10.0.0.3");
        let cluster = cluster_with(config(), cloud.clone());

        update_security_groups(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        assert_eq!(
            cloud.calls_with("create_security_group_rule"),
            vec![
                format!("create_security_group_rule {group_id} 10.0.0.1"),
                format!("create_security_group_rule {group_id} 10.0.0.2"),
            ]
        );

        // A second run adds the same rules again.
        update_security_groups(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        assert_eq!(cloud.calls_with("create_security_group_rule").len(), 4);
    }

    #[tokio::test]
    async fn destroy_removes_only_cluster_groups() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.add_security_group("demo-internal");
        cloud.add_security_group("default");
        let cluster = cluster_with(config(), cloud.clone());

        destroy_security_groups(&cluster, FailurePolicy::ContinueOnError).await.unwrap();
        let left: Vec<_> = cloud.groups().into_iter().map(|g| g.name).collect();
        assert_eq!(left, vec!["default"]);
    }
}

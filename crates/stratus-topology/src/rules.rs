//! Security rule expansion.
//!
//! A template scoped by `remote_ip_node_prefixes` becomes one rule per
//! matched node of the listed types, carrying the node's address. A
//! template with a literal `remote_ip_prefix` adds one rule for it.
//! Templates with neither are left to whoever manages them.

use tracing::debug;

use stratus_core::config::RuleTemplate;
use stratus_core::{NodeRecord, SecurityRuleRequest};

/// Expand `templates` of the group `group_id` against the matched `nodes`.
///
/// Output is in template order, then node order. Nothing is deduplicated,
/// so applying the same expansion twice creates every rule twice.
pub fn expand_rules(
    group_id: &str,
    templates: &[RuleTemplate],
    nodes: &[NodeRecord],
) -> Vec<SecurityRuleRequest> {
    let mut rules = Vec::new();
    for template in templates {
        if let Some(prefixes) = &template.remote_ip_node_prefixes {
            for node in nodes
                .iter()
                .filter(|n| prefixes.iter().any(|p| p == n.type_name()))
            {
                if node.address.is_empty() {
                    debug!(node = %node.name, "node has no address yet, no rule emitted");
                    continue;
                }
                rules.push(concrete(group_id, template, node.address.clone()));
            }
        }
        if let Some(prefix) = &template.remote_ip_prefix {
            rules.push(concrete(group_id, template, prefix.clone()));
        }
    }
    rules
}

fn concrete(group_id: &str, template: &RuleTemplate, remote_ip_prefix: String) -> SecurityRuleRequest {
    SecurityRuleRequest {
        security_group_id: group_id.to_string(),
        direction: template.direction.clone(),
        ethertype: template.ethertype.clone(),
        protocol: template.protocol.clone(),
        port_range_min: template.port_range_min,
        port_range_max: template.port_range_max,
        remote_ip_prefix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::node;

    fn template() -> RuleTemplate {
        RuleTemplate {
            direction: "ingress".to_string(),
            ethertype: "IPv4".to_string(),
            protocol: Some("tcp".to_string()),
            port_range_min: Some(80),
            port_range_max: Some(80),
            remote_ip_prefix: None,
            remote_ip_node_prefixes: None,
        }
    }

    fn nodes() -> Vec<NodeRecord> {
        vec![
            node("web", 1, "10.0.0.1"),
            node("db", 1, "10.0.0.2"),
            node("web", 2, "10.0.0.3"),
        ]
    }

    #[test]
    fn node_prefixes_expand_to_matching_nodes() {
        let mut t = template();
        t.remote_ip_node_prefixes = Some(vec!["web".to_string()]);

        let rules = expand_rules("sg-1", &[t.clone()], &nodes());

        assert_eq!(rules.len(), 2);
        let prefixes: Vec<&str> = rules.iter().map(|r| r.remote_ip_prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["10.0.0.1", "10.0.0.3"]);
        for rule in &rules {
            assert_eq!(rule.security_group_id, "sg-1");
            assert_eq!(rule.direction, t.direction);
            assert_eq!(rule.ethertype, t.ethertype);
            assert_eq!(rule.protocol, t.protocol);
            assert_eq!(rule.port_range_min, t.port_range_min);
            assert_eq!(rule.port_range_max, t.port_range_max);
        }
    }

    #[test]
    fn both_scopes_yield_union() {
        let mut t = template();
        t.remote_ip_node_prefixes = Some(vec!["web".to_string()]);
        t.remote_ip_prefix = Some("0.0.0.0/0".to_string());

        let rules = expand_rules("sg-1", &[t], &nodes());

        assert_eq!(rules.len(), 3);
        assert_eq!(rules[2].remote_ip_prefix, "0.0.0.0/0");
    }

    #[test]
    fn unscoped_templates_contribute_nothing() {
        assert!(expand_rules("sg-1", &[template()], &nodes()).is_empty());
    }

    #[test]
    fn order_is_template_then_node() {
        let mut db = template();
        db.remote_ip_node_prefixes = Some(vec!["db".to_string()]);
        let mut web = template();
        web.remote_ip_node_prefixes = Some(vec!["web".to_string()]);
        let mut both = template();
        both.remote_ip_node_prefixes = Some(vec!["web".to_string(), "db".to_string()]);

        let prefixes: Vec<String> = expand_rules("sg", &[db, web, both], &nodes())
            .into_iter()
            .map(|r| r.remote_ip_prefix)
            .collect();
        assert_eq!(
            prefixes,
            vec!["10.0.0.2", "10.0.0.1", "10.0.0.3", "10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );
    }

    #[test]
    fn repeated_templates_are_not_deduplicated() {
        let mut t = template();
        t.remote_ip_prefix = Some("192.168.0.0/16".to_string());

        let rules = expand_rules("sg", &[t.clone(), t], &nodes());
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0], rules[1]);
    }
}

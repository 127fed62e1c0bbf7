//! Naming conventions that correlate declared resources with live ones.
//!
//! - Nodes are named `<type>-<index>`.
//! - Security groups are named `<cluster>-<group>`.
//! - Volumes are named `<node>-<volume type>`.
//!
//! Cluster and group names must not contain [`SEPARATOR`]; config
//! validation enforces that so group names parse unambiguously.

/// Separator used by every composed name.
pub const SEPARATOR: char = '-';

/// Outcome of parsing a live instance name against the declared node types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeName<'a> {
    /// The name is `<type>-<index>` and `type` is declared.
    Matched { type_name: &'a str, index: u32 },
    /// Anything else. Not an error: the instance is simply not ours.
    Unmatched,
}

impl<'a> NodeName<'a> {
    /// Parse `name`, accepting it only when the part before the last
    /// separator satisfies `is_known_type` and the rest is all digits.
    pub fn parse(name: &'a str, is_known_type: impl Fn(&str) -> bool) -> Self {
        let Some((type_name, index)) = name.rsplit_once(SEPARATOR) else {
            return NodeName::Unmatched;
        };
        if type_name.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return NodeName::Unmatched;
        }
        let Ok(index) = index.parse::<u32>() else {
            return NodeName::Unmatched;
        };
        if !is_known_type(type_name) {
            return NodeName::Unmatched;
        }
        NodeName::Matched { type_name, index }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, NodeName::Matched { .. })
    }
}

/// `"{type}-{index}"`.
pub fn compose_node_name(type_name: &str, index: u32) -> String {
    format!("{type_name}{SEPARATOR}{index}")
}

/// Node type of a composed node name, without checking it is declared.
pub fn node_type_of(name: &str) -> Option<&str> {
    name.rsplit_once(SEPARATOR).map(|(type_name, _)| type_name)
}

/// `"{cluster}-{group}"`.
pub fn compose_group_name(cluster: &str, group: &str) -> String {
    format!("{cluster}{SEPARATOR}{group}")
}

/// Inverse of [`compose_group_name`]. Returns `(cluster, group)`.
pub fn parse_group_name(full: &str) -> Option<(&str, &str)> {
    let (cluster, group) = full.split_once(SEPARATOR)?;
    if cluster.is_empty() || group.is_empty() {
        return None;
    }
    Some((cluster, group))
}

/// The group part of `full` if it belongs to `cluster`.
pub fn plain_group_name<'a>(cluster: &str, full: &'a str) -> Option<&'a str> {
    match parse_group_name(full) {
        Some((c, group)) if c == cluster => Some(group),
        _ => None,
    }
}

/// `"{node}-{volume}"`.
pub fn compose_volume_name(node_name: &str, volume_type: &str) -> String {
    format!("{node_name}{SEPARATOR}{volume_type}")
}

/// Declared image name for a runtime image reference.
///
/// `registry.example.org/nginx:1.25` → `nginx`. The name is the text
/// between the first `/` and the last `:`; missing parts are skipped.
pub fn image_name_from_reference(reference: &str) -> &str {
    let after_registry = match reference.split_once('/') {
        Some((_, rest)) => rest,
        None => reference,
    };
    match after_registry.rsplit_once(':') {
        // A ':' inside a path segment belongs to a registry port, not a tag.
        Some((name, tag)) if !tag.contains('/') => name,
        _ => after_registry,
    }
}

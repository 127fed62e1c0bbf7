//! Allow-list filter shared by every container operation.

use stratus_core::naming::image_name_from_reference;

use crate::joins::{ContainerWorkItem, ImageWorkItem, LiveImageWorkItem};

/// Allow-lists per key. An empty list leaves that key unconstrained, so
/// the default filter lets everything through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    pub node_types: Vec<String>,
    pub node_ids: Vec<String>,
    pub image_names: Vec<String>,
    pub container_ids: Vec<String>,
}

impl ContainerFilter {
    pub fn is_empty(&self) -> bool {
        self.node_types.is_empty()
            && self.node_ids.is_empty()
            && self.image_names.is_empty()
            && self.container_ids.is_empty()
    }

    /// Conjunction over every key. The container id is only checked when
    /// the caller has one.
    pub fn should_process(
        &self,
        node_type: &str,
        node_id: &str,
        image_name: &str,
        container_id: Option<&str>,
    ) -> bool {
        allows(&self.node_types, node_type)
            && allows(&self.node_ids, node_id)
            && allows(&self.image_names, image_name)
            && container_id.is_none_or(|id| allows_container(&self.container_ids, id))
    }

    pub fn accepts_image(&self, item: &ImageWorkItem<'_>) -> bool {
        self.should_process(item.node.type_name(), &item.node.id, &item.image_name, None)
    }

    pub fn accepts_container(&self, item: &ContainerWorkItem<'_>) -> bool {
        self.should_process(
            item.node.type_name(),
            &item.node.id,
            image_name_from_reference(&item.container.image),
            Some(&item.container.id),
        )
    }

    pub fn accepts_live_image(&self, item: &LiveImageWorkItem<'_>) -> bool {
        self.should_process(
            item.node.type_name(),
            &item.node.id,
            image_name_from_reference(item.image.reference()),
            None,
        )
    }
}

fn allows(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|v| v == value)
}

// Runtimes report full 64-char ids; users usually pass the short form.
fn allows_container(list: &[String], id: &str) -> bool {
    list.is_empty() || list.iter().any(|v| !v.is_empty() && id.starts_with(v.as_str()))
}

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

/// PermissionNode
///
/// One named capability in the permission tree. Keys are meant to be globally
/// unique but the tree does not enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PermissionNode {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schema(no_recursion)]
    pub children: Vec<PermissionNode>,
}

impl PermissionNode {
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<PermissionNode>) -> Self {
        self.children = children;
        self
    }
}

/// Appends `children` under the first node whose key is `parent_key`, searching
/// depth-first in order. Returns false when no such node exists.
pub(crate) fn attach(nodes: &mut [PermissionNode], parent_key: &str, children: &mut Vec<PermissionNode>) -> bool {
    for node in nodes.iter_mut() {
        if node.key == parent_key {
            node.children.append(children);
            return true;
        }
        if attach(&mut node.children, parent_key, children) {
            return true;
        }
    }
    false
}

/// Pre-order list of every key in `nodes`.
pub(crate) fn flatten(nodes: &[PermissionNode]) -> Vec<String> {
    let mut keys = Vec::new();
    collect(nodes, &mut keys);
    keys
}

fn collect(nodes: &[PermissionNode], keys: &mut Vec<String>) {
    for node in nodes {
        keys.push(node.key.clone());
        collect(&node.children, keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_finds_nested_parent() {
        let mut tree = vec![
            PermissionNode::new("dashboard:menu", "Dashboard"),
            PermissionNode::new("system:manage", "System")
                .with_children(vec![PermissionNode::new("system:user:menu", "Users")]),
        ];
        let mut children = vec![PermissionNode::new("system:user:list", "List")];
        assert!(attach(&mut tree, "system:user:menu", &mut children));
        assert_eq!(
            flatten(&tree),
            vec!["dashboard:menu", "system:manage", "system:user:menu", "system:user:list"]
        );
    }

    #[test]
    fn attach_reports_missing_parent() {
        let mut tree = vec![PermissionNode::new("system:manage", "System")];
        let mut children = vec![PermissionNode::new("x", "X")];
        assert!(!attach(&mut tree, "nope", &mut children));
        assert_eq!(flatten(&tree), vec!["system:manage"]);
    }
}

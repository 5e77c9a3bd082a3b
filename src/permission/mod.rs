//! Permission registry: the permission tree, the actionable permission entries
//! the router derives from module routes, and the enforcement allow-list.
//!
//! The registry has a two-phase lifecycle. During registration modules add
//! subtrees and routes add actionable entries; `freeze` then turns it read-only
//! for the serving phase. Everything sits behind reader/writer locks so the
//! read path never depends on registration having finished "in time".

use axum::http::Method;
use std::sync::{PoisonError, RwLock};

pub mod enforce;
pub mod matcher;
pub mod tree;

pub use enforce::authorize;
pub use matcher::matches;
pub use tree::PermissionNode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("permission parent `{0}` not found")]
    ParentNotFound(String),
    #[error("permission registry is frozen")]
    Frozen,
}

/// ApiPattern
///
/// One HTTP method and path pattern (`:param` segments allowed) bound to a permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPattern {
    pub method: Method,
    pub path: String,
}

/// ActionEntry
///
/// An actionable permission: a key plus every API pattern that requires it,
/// in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEntry {
    pub key: String,
    pub apis: Vec<ApiPattern>,
}

#[derive(Debug, Default)]
struct RegistryState {
    tree: Vec<PermissionNode>,
    actions: Vec<ActionEntry>,
    allow_list: Vec<String>,
    frozen: bool,
}

#[derive(Debug, Default)]
pub struct PermissionRegistry {
    state: RwLock<RegistryState>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose allow-list starts with `patterns`.
    pub fn with_allow_list<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        registry.write().allow_list = patterns.into_iter().map(Into::into).collect();
        registry
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn writable(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>, RegistryError> {
        let state = self.write();
        if state.frozen {
            return Err(RegistryError::Frozen);
        }
        Ok(state)
    }

    /// Replaces the whole tree. Called once before any module registers.
    pub fn set_base(&self, nodes: Vec<PermissionNode>) -> Result<(), RegistryError> {
        self.writable()?.tree = nodes;
        Ok(())
    }

    /// Appends `nodes` as top-level siblings when `parent_key` is empty, otherwise
    /// under the first node (depth-first) whose key is `parent_key`.
    pub fn add_subtree(&self, parent_key: &str, mut nodes: Vec<PermissionNode>) -> Result<(), RegistryError> {
        let mut state = self.writable()?;
        if parent_key.is_empty() {
            state.tree.append(&mut nodes);
            return Ok(());
        }
        if tree::attach(&mut state.tree, parent_key, &mut nodes) {
            Ok(())
        } else {
            Err(RegistryError::ParentNotFound(parent_key.to_string()))
        }
    }

    /// Like [`add_subtree`](Self::add_subtree) but drops the subtree when the
    /// parent is missing. Returns whether the nodes were attached.
    pub fn add_subtree_lenient(&self, parent_key: &str, nodes: Vec<PermissionNode>) -> Result<bool, RegistryError> {
        match self.add_subtree(parent_key, nodes) {
            Ok(()) => Ok(true),
            Err(RegistryError::ParentNotFound(parent)) => {
                tracing::debug!(%parent, "permission subtree dropped, parent missing");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Binds `method path` to permission `key`. Entries keep the order in which
    /// their key was first seen.
    pub fn add_action(&self, key: &str, method: Method, path: &str) -> Result<(), RegistryError> {
        let mut state = self.writable()?;
        let api = ApiPattern {
            method,
            path: path.to_string(),
        };
        match state.actions.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => entry.apis.push(api),
            None => state.actions.push(ActionEntry {
                key: key.to_string(),
                apis: vec![api],
            }),
        }
        Ok(())
    }

    pub fn allow(&self, pattern: &str) -> Result<(), RegistryError> {
        self.writable()?.allow_list.push(pattern.to_string());
        Ok(())
    }

    /// Ends the registration phase.
    pub fn freeze(&self) {
        self.write().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.read().frozen
    }

    /// Every key in the tree, pre-order.
    pub fn flatten(&self) -> Vec<String> {
        tree::flatten(&self.read().tree)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.flatten().iter().any(|k| k == key)
    }

    pub fn tree(&self) -> Vec<PermissionNode> {
        self.read().tree.clone()
    }

    pub fn actions(&self) -> Vec<ActionEntry> {
        self.read().actions.clone()
    }

    /// The permission key whose API patterns first match `method path`, scanning
    /// entries in registration order.
    pub fn match_action(&self, method: &Method, path: &str) -> Option<String> {
        self.read()
            .actions
            .iter()
            .find(|entry| {
                entry
                    .apis
                    .iter()
                    .any(|api| &api.method == method && matcher::matches(&api.path, path))
            })
            .map(|entry| entry.key.clone())
    }

    pub fn is_allow_listed(&self, path: &str) -> bool {
        self.read()
            .allow_list
            .iter()
            .any(|pattern| matcher::matches(pattern, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: &str) -> PermissionNode {
        PermissionNode::new(key, key)
    }

    #[test]
    fn subtrees_merge_under_existing_keys() {
        let registry = PermissionRegistry::new();
        registry.set_base(vec![node("system")]).unwrap();
        registry.add_subtree("system", vec![node("system:user:menu")]).unwrap();
        registry
            .add_subtree("system:user:menu", vec![node("system:user:list")])
            .unwrap();
        assert_eq!(
            registry.flatten(),
            vec!["system", "system:user:menu", "system:user:list"]
        );
    }

    #[test]
    fn empty_parent_appends_top_level() {
        let registry = PermissionRegistry::new();
        registry.set_base(vec![node("dashboard:menu")]).unwrap();
        registry.add_subtree("", vec![node("reports")]).unwrap();
        assert_eq!(registry.flatten(), vec!["dashboard:menu", "reports"]);
    }

    #[test]
    fn missing_parent_is_reported_or_dropped() {
        let registry = PermissionRegistry::new();
        registry.set_base(vec![node("system")]).unwrap();
        assert_eq!(
            registry.add_subtree("ghost", vec![node("a")]),
            Err(RegistryError::ParentNotFound("ghost".into()))
        );
        assert_eq!(registry.add_subtree_lenient("ghost", vec![node("a")]), Ok(false));
        assert_eq!(registry.flatten(), vec!["system"]);
    }

    #[test]
    fn duplicate_keys_under_different_parents_both_appear() {
        let registry = PermissionRegistry::new();
        registry.set_base(vec![node("a"), node("b")]).unwrap();
        registry.add_subtree("a", vec![node("shared")]).unwrap();
        registry.add_subtree("b", vec![node("shared")]).unwrap();
        assert_eq!(registry.flatten(), vec!["a", "shared", "b", "shared"]);
    }

    #[test]
    fn frozen_registry_rejects_writes() {
        let registry = PermissionRegistry::new();
        registry.freeze();
        assert_eq!(registry.set_base(vec![]), Err(RegistryError::Frozen));
        assert_eq!(registry.add_subtree("", vec![node("a")]), Err(RegistryError::Frozen));
        assert_eq!(
            registry.add_action("a", Method::GET, "/a"),
            Err(RegistryError::Frozen)
        );
        assert!(registry.is_frozen());
    }

    #[test]
    fn first_registered_action_wins() {
        let registry = PermissionRegistry::new();
        registry.add_action("users:list", Method::GET, "/users/:id").unwrap();
        registry.add_action("users:special", Method::GET, "/users/me").unwrap();
        registry.add_action("users:delete", Method::DELETE, "/users/:id").unwrap();

        assert_eq!(registry.match_action(&Method::GET, "/users/me").as_deref(), Some("users:list"));
        assert_eq!(registry.match_action(&Method::DELETE, "/users/3").as_deref(), Some("users:delete"));
        assert_eq!(registry.match_action(&Method::PUT, "/users/3"), None);
        assert_eq!(registry.actions().len(), 3);
    }

    #[test]
    fn allow_list_uses_path_patterns() {
        let registry = PermissionRegistry::with_allow_list(["/admin-api/auth/logout"]);
        registry.allow("/admin-api/files/:name").unwrap();
        assert!(registry.is_allow_listed("/admin-api/auth/logout"));
        assert!(registry.is_allow_listed("/admin-api/files/a.png"));
        assert!(!registry.is_allow_listed("/admin-api/auth/logout/"));
    }
}

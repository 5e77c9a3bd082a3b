use crate::{
    module::{RouteDescriptor, perm_route},
    permission::PermissionNode,
};

/// CrudPerms
///
/// The standard permission set of a CRUD resource: `{prefix}:{module}:menu` with
/// `list`, `create`, `edit` and `delete` children, plus the five standard routes
/// guarded by them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrudPerms {
    pub menu: String,
    pub list: String,
    pub create: String,
    pub edit: String,
    pub delete: String,
    pub tree: Vec<PermissionNode>,
}

impl CrudPerms {
    pub fn new(prefix: &str, module: &str, label: &str) -> Self {
        let base = format!("{prefix}:{module}");
        let menu = format!("{base}:menu");
        let list = format!("{base}:list");
        let create = format!("{base}:create");
        let edit = format!("{base}:edit");
        let delete = format!("{base}:delete");
        let tree = vec![PermissionNode::new(&menu, label).with_children(vec![
            PermissionNode::new(&list, "List"),
            PermissionNode::new(&create, "Create"),
            PermissionNode::new(&edit, "Edit"),
            PermissionNode::new(&delete, "Delete"),
        ])];
        Self {
            menu,
            list,
            create,
            edit,
            delete,
            tree,
        }
    }

    /// Appends `extra` under the menu node.
    pub fn with_extra(mut self, extra: Vec<PermissionNode>) -> Self {
        if let Some(menu) = self.tree.first_mut() {
            menu.children.extend(extra);
        }
        self
    }

    /// List, Get, Create, Update and Delete.
    pub fn routes(&self) -> Vec<RouteDescriptor> {
        vec![
            perm_route("GET", "", "List", &self.list),
            perm_route("GET", "/:id", "Get", &self.list),
            perm_route("POST", "", "Create", &self.create),
            perm_route("PUT", "/:id", "Update", &self.edit),
            perm_route("DELETE", "/:id", "Delete", &self.delete),
        ]
    }

    pub fn routes_with_extra(&self, extra: Vec<RouteDescriptor>) -> Vec<RouteDescriptor> {
        let mut routes = self.routes();
        routes.extend(extra);
        routes
    }

    /// The standard routes plus `DELETE /batch` and `PATCH /:id/enabled`.
    /// `/batch` is listed before `/:id` so permission lookups hit it first.
    pub fn full_routes(&self) -> Vec<RouteDescriptor> {
        let mut routes = vec![perm_route("DELETE", "/batch", "BatchDelete", &self.delete)];
        routes.extend(self.routes());
        routes.push(perm_route("PATCH", "/:id/enabled", "ToggleEnabled", &self.edit));
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::tree;

    #[test]
    fn keys_follow_prefix_module_action() {
        let perms = CrudPerms::new("system", "admin_user", "Admin users");
        assert_eq!(perms.menu, "system:admin_user:menu");
        assert_eq!(perms.delete, "system:admin_user:delete");
        assert_eq!(
            tree::flatten(&perms.tree),
            vec![
                "system:admin_user:menu",
                "system:admin_user:list",
                "system:admin_user:create",
                "system:admin_user:edit",
                "system:admin_user:delete",
            ]
        );
    }

    #[test]
    fn extra_nodes_go_under_the_menu() {
        let perms = CrudPerms::new("system", "admin_role", "Roles")
            .with_extra(vec![PermissionNode::new("system:admin_role:permission", "Permissions")]);
        assert_eq!(perms.tree.len(), 1);
        assert_eq!(perms.tree[0].children.len(), 5);
        assert_eq!(
            tree::flatten(&perms.tree).last().map(String::as_str),
            Some("system:admin_role:permission")
        );
    }

    #[test]
    fn standard_routes_use_matching_permissions() {
        let perms = CrudPerms::new("system", "admin_user", "Admin users");
        let routes = perms.routes_with_extra(vec![perm_route("GET", "/export", "Export", &perms.list)]);
        assert_eq!(routes.len(), 6);
        let update = routes.iter().find(|r| r.operation == "Update").unwrap();
        assert_eq!(update.method, "PUT");
        assert_eq!(update.path, "/:id");
        assert_eq!(update.permission.as_deref(), Some("system:admin_user:edit"));
        assert!(routes.iter().all(|r| !r.public));

        let full = perms.full_routes();
        assert_eq!(full[0].operation, "BatchDelete");
        assert_eq!(full.len(), 7);
    }
}

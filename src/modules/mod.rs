//! Feature modules served by the engine.

use std::sync::Arc;

use crate::{
    accounts::AccountDirectory, config::AppConfig, module::Module, permission::PermissionRegistry,
    permission::PermissionNode, store::StoreState,
};

pub mod admin_role;
pub mod admin_user;
pub mod session;

pub use admin_role::AdminRoleModule;
pub use admin_user::AdminUserModule;
pub use session::SessionModule;

pub const PERM_DASHBOARD: &str = "dashboard:menu";
pub const PERM_SYSTEM_MANAGE: &str = "system:manage";

/// The fixed top of the permission tree, set before any module registers.
pub fn base_permissions() -> Vec<PermissionNode> {
    vec![
        PermissionNode::new(PERM_DASHBOARD, "Dashboard"),
        PermissionNode::new(PERM_SYSTEM_MANAGE, "System"),
    ]
}

/// The modules a stock deployment serves, in registration order.
pub fn default_modules(
    config: &AppConfig,
    store: StoreState,
    directory: Arc<AccountDirectory>,
    registry: Arc<PermissionRegistry>,
) -> Vec<Arc<dyn Module>> {
    vec![
        Arc::new(SessionModule::new(config.clone(), directory)),
        Arc::new(AdminUserModule::new(store.clone())),
        Arc::new(AdminRoleModule::new(store, registry)),
    ]
}

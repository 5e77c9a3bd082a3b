use axum::response::{IntoResponse, Response};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use super::PERM_SYSTEM_MANAGE;
use crate::{
    crud::{CrudEngine, CrudHooks, CrudPerms, Tx, finish},
    error::AppError,
    models::{
        AdminRole, AdminRoleListQuery, AdminRolePermission, AdminUserRole, CreateAdminRoleRequest,
        RolePermissionsResponse, UpdateAdminRoleRequest, UpdateRolePermissionsRequest,
    },
    module::{Module, ModuleDescriptor, OperationTable, RequestContext, auth_route, bind, perm_route},
    permission::{PermissionNode, PermissionRegistry},
    response::ApiResponse,
    store::{Entity, FieldSet, Filter, Record, Select, Sort, Store, StoreState, from_records},
};

pub const PERM_ROLE_PERMISSION: &str = "system:admin_role:permission";

pub type AdminRoleEngine = CrudEngine<AdminRole, AdminRoleListQuery, CreateAdminRoleRequest, UpdateAdminRoleRequest>;
type AdminRoleHooks = CrudHooks<AdminRole, AdminRoleListQuery, CreateAdminRoleRequest, UpdateAdminRoleRequest>;

/// AdminRoleModule
///
/// Roles under `/admin-roles`. Besides the standard CRUD routes it serves the
/// permission tree for role editors and reads/replaces a role's permission keys.
/// Keys are checked against the registry, so a role can only be granted
/// permissions some module actually registered.
pub struct AdminRoleModule {
    engine: Arc<AdminRoleEngine>,
    store: StoreState,
    registry: Arc<PermissionRegistry>,
    perms: CrudPerms,
}

impl AdminRoleModule {
    pub fn new(store: StoreState, registry: Arc<PermissionRegistry>) -> Self {
        Self {
            engine: Arc::new(engine(store.clone(), registry.clone())),
            store,
            registry,
            perms: CrudPerms::new("system", "admin_role", "Roles").with_extra(vec![PermissionNode::new(
                PERM_ROLE_PERMISSION,
                "Assign permissions",
            )]),
        }
    }

    /// `GET /all`: every enabled role, for pickers.
    async fn get_all(&self, _ctx: RequestContext) -> Result<Response, AppError> {
        let select = Select::new(Filter::new().eq("enabled", true)).sorted(Sort::asc("id"));
        let roles: Vec<AdminRole> = from_records(self.store.find(AdminRole::TABLE, &select).await?)?;
        Ok(ApiResponse::success(roles).into_response())
    }

    /// `GET /permissions`: the full permission tree.
    async fn get_all_permissions(&self, _ctx: RequestContext) -> Result<Response, AppError> {
        Ok(ApiResponse::success(self.registry.tree()).into_response())
    }

    async fn get_permissions(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let permissions = role_permissions(self.store.as_ref(), ctx.id()?).await?;
        Ok(ApiResponse::success(RolePermissionsResponse { permissions }).into_response())
    }

    /// `PUT /:id/permissions`: replaces the role's keys in one transaction.
    async fn update_permissions(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let id = ctx.id()?;
        let request: UpdateRolePermissionsRequest = ctx.json()?;
        let permissions = request
            .permissions
            .ok_or_else(|| AppError::BadRequest("permissions is required".to_string()))?;

        if !self.store.exists(AdminRole::TABLE, &Filter::by_id(id)).await? {
            return Err(AppError::NotFound("role not found".to_string()));
        }

        let mut tx = self.store.begin().await?;
        let result = replace_permissions(&mut tx, &self.registry, id, &permissions).await;
        let saved = finish(tx, result).await?;
        tracing::info!(role_id = id, count = saved.len(), "role permissions replaced");
        Ok(ApiResponse::with_message("permissions updated", RolePermissionsResponse { permissions: saved }).into_response())
    }
}

impl Module for AdminRoleModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            name: "admin_role".to_string(),
            group: "/admin-roles".to_string(),
            routes: {
                let mut routes = self.perms.full_routes();
                routes.extend([
                    auth_route("GET", "/all", "GetAll"),
                    auth_route("GET", "/permissions", "GetAllPermissions"),
                    perm_route("GET", "/:id/permissions", "GetPermissions", &self.perms.list),
                    perm_route("PUT", "/:id/permissions", "UpdatePermissions", PERM_ROLE_PERMISSION),
                ]);
                routes
            },
            permission_parent: Some(PERM_SYSTEM_MANAGE.to_string()),
            permissions: self.perms.tree.clone(),
        }
    }

    fn operations(self: Arc<Self>) -> OperationTable {
        self.engine
            .clone()
            .operations()
            .with("GetAll", bind(&self, |m, ctx| async move { m.get_all(ctx).await }))
            .with(
                "GetAllPermissions",
                bind(&self, |m, ctx| async move { m.get_all_permissions(ctx).await }),
            )
            .with(
                "GetPermissions",
                bind(&self, |m, ctx| async move { m.get_permissions(ctx).await }),
            )
            .with(
                "UpdatePermissions",
                bind(&self, |m, ctx| async move { m.update_permissions(ctx).await }),
            )
    }
}

fn engine(store: StoreState, registry: Arc<PermissionRegistry>) -> AdminRoleEngine {
    let create_registry = registry;
    let hooks = AdminRoleHooks::new()
        .build_list(|query: &AdminRoleListQuery| {
            Filter::new()
                .like("name", query.name.as_deref().unwrap_or_default())
                .like("code", query.code.as_deref().unwrap_or_default())
                .like("description", query.description.as_deref().unwrap_or_default())
                .eq_opt("enabled", query.enabled)
        })
        .after_list({
            let store = store.clone();
            move |roles| {
                let store = store.clone();
                Box::pin(async move {
                    let ids: Vec<i64> = roles.iter().map(|r| r.id).collect();
                    if ids.is_empty() {
                        return Ok(());
                    }
                    let select = Select::new(Filter::new().any_of("role_id", ids));
                    let rows: Vec<AdminRolePermission> =
                        from_records(store.find(AdminRolePermission::TABLE, &select).await?)?;
                    let mut by_role: HashMap<i64, Vec<String>> = HashMap::new();
                    for row in rows {
                        by_role.entry(row.role_id).or_default().push(row.permission);
                    }
                    for role in roles.iter_mut() {
                        role.permissions = by_role.remove(&role.id).unwrap_or_default();
                    }
                    Ok(())
                })
            }
        })
        .after_get({
            let store = store.clone();
            move |role| {
                let store = store.clone();
                Box::pin(async move {
                    role.permissions = role_permissions(store.as_ref(), role.id).await?;
                    Ok(())
                })
            }
        })
        .new_from_create({
            let store = store.clone();
            move |request| {
                let store = store.clone();
                Box::pin(async move {
                    let name = request.name.trim();
                    let code = request.code.trim();
                    if name.is_empty() || code.is_empty() {
                        return Err(AppError::Validation("role name and code are required".to_string()));
                    }
                    if store.exists(AdminRole::TABLE, &Filter::new().eq("code", code)).await? {
                        return Err(AppError::Validation("role code already exists".to_string()));
                    }
                    if store.exists(AdminRole::TABLE, &Filter::new().eq("name", name)).await? {
                        return Err(AppError::Validation("role name already exists".to_string()));
                    }
                    Ok(AdminRole {
                        name: name.to_string(),
                        code: code.to_string(),
                        description: request.description.clone(),
                        enabled: request.enabled.unwrap_or(true),
                        ..AdminRole::default()
                    })
                })
            }
        })
        .create_in_tx(move |tx, role, request| {
            let registry = create_registry.clone();
            Box::pin(async move {
                role.permissions = save_permissions(tx, &registry, role.id, &request.permissions).await?;
                Ok(())
            })
        })
        .build_updates({
            let store = store.clone();
            move |request, existing| {
                let store = store.clone();
                Box::pin(async move {
                    let name = request.name.trim();
                    if !name.is_empty() && name != existing.name {
                        let taken = Filter::new().eq("name", name).ne("id", existing.id);
                        if store.exists(AdminRole::TABLE, &taken).await? {
                            return Err(AppError::Validation("role name already exists".to_string()));
                        }
                    }
                    let mut fields = FieldSet::new();
                    if !name.is_empty() {
                        fields.set("name", name);
                    }
                    if !request.description.is_empty() {
                        fields.set("description", request.description.clone());
                    }
                    if let Some(enabled) = request.enabled {
                        fields.set("enabled", enabled);
                    }
                    Ok(fields)
                })
            }
        })
        .reload_after_update(|tx, id, role| {
            Box::pin(async move {
                let select = Select::new(Filter::new().eq("role_id", id));
                let rows: Vec<AdminRolePermission> =
                    from_records(tx.find(AdminRolePermission::TABLE, &select).await?)?;
                role.permissions = rows.into_iter().map(|row| row.permission).collect();
                Ok(())
            })
        })
        .delete_in_tx(|tx, id| {
            Box::pin(async move {
                tx.delete(AdminRolePermission::TABLE, &Filter::new().eq("role_id", id)).await?;
                tx.delete(AdminUserRole::TABLE, &Filter::new().eq("role_id", id)).await?;
                Ok(())
            })
        })
        .delete_batch_in_tx(|tx, ids| {
            Box::pin(async move {
                let linked = Filter::new().any_of("role_id", ids.iter().copied());
                tx.delete(AdminRolePermission::TABLE, &linked).await?;
                tx.delete(AdminUserRole::TABLE, &linked).await?;
                Ok(())
            })
        });

    CrudEngine::new(store, hooks).not_found_msg("role not found")
}

/// Permission keys granted to `role_id`, in insertion order.
pub async fn role_permissions(store: &dyn Store, role_id: i64) -> Result<Vec<String>, AppError> {
    let select = Select::new(Filter::new().eq("role_id", role_id)).sorted(Sort::asc("id"));
    let rows: Vec<AdminRolePermission> = from_records(store.find(AdminRolePermission::TABLE, &select).await?)?;
    Ok(rows.into_iter().map(|row| row.permission).collect())
}

async fn replace_permissions(
    tx: &mut Tx,
    registry: &PermissionRegistry,
    role_id: i64,
    permissions: &[String],
) -> Result<Vec<String>, AppError> {
    tx.delete(AdminRolePermission::TABLE, &Filter::new().eq("role_id", role_id))
        .await?;
    save_permissions(tx, registry, role_id, permissions).await
}

/// Inserts `permissions` for `role_id`. Keys are trimmed and de-duplicated; an
/// empty or unregistered key rejects the whole set.
async fn save_permissions(
    tx: &mut Tx,
    registry: &PermissionRegistry,
    role_id: i64,
    permissions: &[String],
) -> Result<Vec<String>, AppError> {
    if permissions.is_empty() {
        return Ok(Vec::new());
    }

    let known: HashSet<String> = registry.flatten().into_iter().collect();
    let mut seen = HashSet::new();
    let mut keys = Vec::with_capacity(permissions.len());
    for raw in permissions {
        let key = raw.trim();
        if key.is_empty() {
            return Err(AppError::Validation("permission key must not be empty".to_string()));
        }
        if !known.contains(key) {
            return Err(AppError::Validation(format!("unknown permission: {key}")));
        }
        if seen.insert(key.to_string()) {
            keys.push(key.to_string());
        }
    }

    for key in &keys {
        let mut row = Record::new();
        row.insert("role_id".to_string(), role_id.into());
        row.insert("permission".to_string(), key.clone().into());
        tx.insert(AdminRolePermission::TABLE, row).await?;
    }
    Ok(keys)
}

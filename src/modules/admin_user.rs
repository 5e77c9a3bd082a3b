use std::{collections::HashMap, sync::Arc};

use super::PERM_SYSTEM_MANAGE;
use crate::{
    accounts::user_role_ids,
    crud::{CrudEngine, CrudHooks, CrudPerms, Tx, unique_ids},
    error::AppError,
    models::{AdminRole, AdminUser, AdminUserListQuery, AdminUserRole, CreateAdminUserRequest, UpdateAdminUserRequest},
    module::{Module, ModuleDescriptor, OperationTable},
    store::{Entity, FieldSet, Filter, Record, Select, StoreState, int_column},
};

pub type AdminUserEngine = CrudEngine<AdminUser, AdminUserListQuery, CreateAdminUserRequest, UpdateAdminUserRequest>;
type AdminUserHooks = CrudHooks<AdminUser, AdminUserListQuery, CreateAdminUserRequest, UpdateAdminUserRequest>;

/// AdminUserModule
///
/// Back-office accounts under `/admin-users`, guarded by `system:admin_user:*`.
/// Role links live in `admin_user_roles` and are rewritten as a whole whenever a
/// request carries `role_ids`.
pub struct AdminUserModule {
    engine: Arc<AdminUserEngine>,
    perms: CrudPerms,
}

impl AdminUserModule {
    pub fn new(store: StoreState) -> Self {
        Self {
            engine: Arc::new(engine(store)),
            perms: CrudPerms::new("system", "admin_user", "Admin users"),
        }
    }

    pub fn engine(&self) -> &Arc<AdminUserEngine> {
        &self.engine
    }
}

impl Module for AdminUserModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            name: "admin_user".to_string(),
            group: "/admin-users".to_string(),
            routes: self.perms.full_routes(),
            permission_parent: Some(PERM_SYSTEM_MANAGE.to_string()),
            permissions: self.perms.tree.clone(),
        }
    }

    fn operations(self: Arc<Self>) -> OperationTable {
        self.engine.clone().operations()
    }
}

fn engine(store: StoreState) -> AdminUserEngine {
    let hooks = AdminUserHooks::new()
        .build_list(|query: &AdminUserListQuery| {
            Filter::new()
                .like("username", query.username.as_deref().unwrap_or_default())
                .like("name", query.name.as_deref().unwrap_or_default())
                .eq_opt("enabled", query.enabled)
        })
        .after_list({
            let store = store.clone();
            move |users| {
                let store = store.clone();
                Box::pin(async move {
                    let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
                    if ids.is_empty() {
                        return Ok(());
                    }
                    let select = Select::new(Filter::new().any_of("user_id", ids));
                    let links = store.find(AdminUserRole::TABLE, &select).await?;
                    let mut by_user: HashMap<i64, Vec<i64>> = HashMap::new();
                    for link in &links {
                        if let (Some(user_id), Some(role_id)) = (int_column(link, "user_id"), int_column(link, "role_id")) {
                            by_user.entry(user_id).or_default().push(role_id);
                        }
                    }
                    for user in users.iter_mut() {
                        user.role_ids = by_user.remove(&user.id).unwrap_or_default();
                    }
                    Ok(())
                })
            }
        })
        .after_get({
            let store = store.clone();
            move |user| {
                let store = store.clone();
                Box::pin(async move {
                    user.role_ids = user_role_ids(store.as_ref(), user.id).await?;
                    Ok(())
                })
            }
        })
        .new_from_create({
            let store = store.clone();
            move |request| {
                let store = store.clone();
                Box::pin(async move {
                    let username = request.username.trim();
                    if username.is_empty() {
                        return Err(AppError::Validation("username is required".to_string()));
                    }
                    if store
                        .exists(AdminUser::TABLE, &Filter::new().eq("username", username))
                        .await?
                    {
                        return Err(AppError::Validation("username already exists".to_string()));
                    }
                    Ok(AdminUser {
                        username: username.to_string(),
                        name: request.name.clone(),
                        avatar: request.avatar.clone(),
                        enabled: request.enabled.unwrap_or(true),
                        ..AdminUser::default()
                    })
                })
            }
        })
        .create_in_tx(|tx, user, request| {
            Box::pin(async move {
                user.role_ids = sync_roles(tx, user.id, &request.role_ids).await?;
                Ok(())
            })
        })
        .build_updates(|request, _existing| {
            Box::pin(async move {
                let mut fields = FieldSet::new();
                if !request.name.is_empty() {
                    fields.set("name", request.name.clone());
                }
                if !request.avatar.is_empty() {
                    fields.set("avatar", request.avatar.clone());
                }
                if let Some(enabled) = request.enabled {
                    fields.set("enabled", enabled);
                }
                Ok(fields)
            })
        })
        .update_in_tx(|tx, id, _user, request| {
            Box::pin(async move {
                if let Some(role_ids) = &request.role_ids {
                    sync_roles(tx, id, role_ids).await?;
                }
                Ok(())
            })
        })
        .reload_after_update(|tx, id, user| {
            Box::pin(async move {
                user.role_ids = linked_role_ids(tx, id).await?;
                Ok(())
            })
        })
        .delete_in_tx(|tx, id| {
            Box::pin(async move {
                tx.find_one(AdminUser::TABLE, &Filter::by_id(id))
                    .await?
                    .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
                tx.delete(AdminUserRole::TABLE, &Filter::new().eq("user_id", id)).await?;
                Ok(())
            })
        })
        .delete_batch_in_tx(|tx, ids| {
            Box::pin(async move {
                tx.delete(AdminUserRole::TABLE, &Filter::new().any_of("user_id", ids.iter().copied()))
                    .await?;
                Ok(())
            })
        });

    CrudEngine::new(store, hooks).not_found_msg("user not found")
}

async fn linked_role_ids(tx: &mut Tx, user_id: i64) -> Result<Vec<i64>, AppError> {
    let links = tx
        .find(AdminUserRole::TABLE, &Select::new(Filter::new().eq("user_id", user_id)))
        .await?;
    Ok(links.iter().filter_map(|link| int_column(link, "role_id")).collect())
}

/// Replaces the user's role links with `role_ids`. Every id must name an
/// existing role. Returns the ids as stored.
async fn sync_roles(tx: &mut Tx, user_id: i64, role_ids: &[i64]) -> Result<Vec<i64>, AppError> {
    tx.delete(AdminUserRole::TABLE, &Filter::new().eq("user_id", user_id))
        .await?;
    if role_ids.is_empty() {
        return Ok(Vec::new());
    }

    let role_ids = unique_ids(role_ids);
    let found = tx
        .find(AdminRole::TABLE, &Select::new(Filter::by_ids(&role_ids)))
        .await?;
    if found.len() != role_ids.len() {
        return Err(AppError::Validation("invalid role id".to_string()));
    }

    for role_id in &role_ids {
        let mut link = Record::new();
        link.insert("user_id".to_string(), user_id.into());
        link.insert("role_id".to_string(), (*role_id).into());
        tx.insert(AdminUserRole::TABLE, link).await?;
    }
    Ok(role_ids)
}

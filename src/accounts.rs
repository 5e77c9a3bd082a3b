use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::{
    auth::{AccountStatus, Principal, PrincipalKind},
    crud::finish,
    error::AppError,
    models::{AdminRole, AdminRolePermission, AdminUser, AdminUserRole, SUPER_ADMIN_ROLE},
    store::{Entity, Filter, Record, Select, Store, StoreState, from_record, from_records, int_column},
};

/// AccountDirectory
///
/// Reads accounts, roles and role permissions from the store to build the
/// [`Principal`] of a request, and answers the account-status check.
pub struct AccountDirectory {
    store: StoreState,
    super_admin_username: String,
}

impl AccountDirectory {
    pub fn new(store: StoreState, super_admin_username: &str) -> Self {
        Self {
            store,
            super_admin_username: super_admin_username.to_string(),
        }
    }

    pub fn store(&self) -> &StoreState {
        &self.store
    }

    pub async fn find_user(&self, user_id: i64) -> Result<Option<AdminUser>, AppError> {
        let record = self
            .store
            .find_one(AdminUser::TABLE, &Filter::by_id(user_id))
            .await?;
        Ok(record.map(from_record).transpose()?)
    }

    /// Creates the configured super-admin account when no account with that
    /// username exists. Returns the account either way.
    pub async fn ensure_super_admin(&self) -> Result<AdminUser, AppError> {
        let by_name = Filter::new().eq("username", self.super_admin_username.as_str());
        if let Some(record) = self.store.find_one(AdminUser::TABLE, &by_name).await? {
            return Ok(from_record(record)?);
        }

        let mut record = Record::new();
        record.insert("username".to_string(), self.super_admin_username.clone().into());
        record.insert("name".to_string(), "Administrator".into());
        record.insert("avatar".to_string(), "".into());
        record.insert("enabled".to_string(), true.into());
        let now = chrono::Utc::now().to_rfc3339();
        record.insert("created_at".to_string(), now.clone().into());
        record.insert("updated_at".to_string(), now.into());

        let mut tx = self.store.begin().await?;
        let stored = tx.insert(AdminUser::TABLE, record).await;
        let stored = finish(tx, stored.map_err(AppError::from)).await?;
        let user: AdminUser = from_record(stored)?;
        tracing::info!(user_id = user.id, username = %user.username, "super admin account created");
        Ok(user)
    }

    /// Builds the principal for `user_id`. The account must exist; disabled
    /// roles contribute neither permissions nor super-admin status.
    pub async fn load_principal(&self, user_id: i64, kind: PrincipalKind) -> Result<Principal, AppError> {
        let user = self
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthenticated("user not found".to_string()))?;

        let role_ids = user_role_ids(self.store.as_ref(), user_id).await?;
        let roles: Vec<AdminRole> = if role_ids.is_empty() {
            Vec::new()
        } else {
            let filter = Filter::new().any_of("id", role_ids).eq("enabled", true);
            from_records(self.store.find(AdminRole::TABLE, &Select::new(filter)).await?)?
        };

        let is_super_admin =
            user.username == self.super_admin_username || roles.iter().any(|r| r.code == SUPER_ADMIN_ROLE);

        let permissions = if roles.is_empty() {
            BTreeSet::new()
        } else {
            let filter = Filter::new().any_of("role_id", roles.iter().map(|r| r.id));
            let rows: Vec<AdminRolePermission> =
                from_records(self.store.find(AdminRolePermission::TABLE, &Select::new(filter)).await?)?;
            rows.into_iter().map(|row| row.permission).collect()
        };

        Ok(Principal {
            user_id: user.id,
            username: user.username,
            kind,
            is_super_admin,
            permissions,
        })
    }
}

#[async_trait]
impl AccountStatus for AccountDirectory {
    async fn is_enabled(&self, user_id: i64) -> Result<bool, AppError> {
        self.find_user(user_id)
            .await?
            .map(|user| user.enabled)
            .ok_or_else(|| AppError::NotFound("user not found".to_string()))
    }
}

/// Role ids linked to `user_id`, in link order.
pub async fn user_role_ids(store: &dyn Store, user_id: i64) -> Result<Vec<i64>, AppError> {
    let select = Select::new(Filter::new().eq("user_id", user_id));
    let links = store.find(AdminUserRole::TABLE, &select).await?;
    Ok(links.iter().filter_map(|link| int_column(link, "role_id")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, to_record};
    use std::sync::Arc;

    async fn seed(store: &MemoryStore) {
        let mut tx = store.begin().await.unwrap();
        let users = [
            AdminUser { id: 1, username: "admin".into(), enabled: true, ..Default::default() },
            AdminUser { id: 2, username: "ops".into(), enabled: true, ..Default::default() },
            AdminUser { id: 3, username: "gone".into(), enabled: false, ..Default::default() },
        ];
        for user in &users {
            let mut record = to_record(AdminUser::TABLE, user).unwrap();
            record.remove("role_ids");
            tx.insert(AdminUser::TABLE, record).await.unwrap();
        }
        let roles = [
            AdminRole { id: 1, name: "Ops".into(), code: "ops".into(), enabled: true, ..Default::default() },
            AdminRole { id: 2, name: "Old".into(), code: "old".into(), enabled: false, ..Default::default() },
        ];
        for role in &roles {
            let mut record = to_record(AdminRole::TABLE, role).unwrap();
            record.remove("permissions");
            tx.insert(AdminRole::TABLE, record).await.unwrap();
        }
        for (id, role_id) in [(1, 1), (2, 2)] {
            let link = AdminUserRole { id, user_id: 2, role_id };
            tx.insert(AdminUserRole::TABLE, to_record(AdminUserRole::TABLE, &link).unwrap())
                .await
                .unwrap();
        }
        for (id, role_id, key) in [(1, 1, "system:admin_user:list"), (2, 2, "system:admin_user:delete")] {
            let row = AdminRolePermission { id, role_id, permission: key.into() };
            tx.insert(AdminRolePermission::TABLE, to_record(AdminRolePermission::TABLE, &row).unwrap())
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
    }

    fn directory(store: &MemoryStore) -> AccountDirectory {
        AccountDirectory::new(Arc::new(store.clone()), "admin")
    }

    #[tokio::test]
    async fn permissions_come_from_enabled_roles_only() {
        let store = MemoryStore::new();
        seed(&store).await;
        let principal = directory(&store).load_principal(2, PrincipalKind::Admin).await.unwrap();
        assert!(!principal.is_super_admin);
        assert!(principal.permissions.contains("system:admin_user:list"));
        assert!(!principal.permissions.contains("system:admin_user:delete"));
    }

    #[tokio::test]
    async fn configured_username_is_super_admin() {
        let store = MemoryStore::new();
        seed(&store).await;
        let principal = directory(&store).load_principal(1, PrincipalKind::Admin).await.unwrap();
        assert!(principal.is_super_admin);
        assert!(principal.permissions.is_empty());
    }

    #[tokio::test]
    async fn super_admin_is_created_once() {
        let store = MemoryStore::new();
        let dir = AccountDirectory::new(Arc::new(store.clone()), "root");
        let first = dir.ensure_super_admin().await.unwrap();
        let second = dir.ensure_super_admin().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.username, "root");
        let principal = dir.load_principal(first.id, PrincipalKind::Admin).await.unwrap();
        assert!(principal.is_super_admin);
    }

    #[tokio::test]
    async fn missing_users_are_unauthenticated_and_status_follows_enabled() {
        let store = MemoryStore::new();
        seed(&store).await;
        let dir = directory(&store);
        assert!(matches!(
            dir.load_principal(99, PrincipalKind::Admin).await,
            Err(AppError::Unauthenticated(_))
        ));
        assert!(dir.is_enabled(2).await.unwrap());
        assert!(!dir.is_enabled(3).await.unwrap());
        assert!(matches!(dir.is_enabled(99).await, Err(AppError::NotFound(_))));
    }
}

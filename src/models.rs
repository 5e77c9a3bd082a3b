use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::store::Entity;

/// Role code that grants every permission, like the configured super-admin username.
pub const SUPER_ADMIN_ROLE: &str = "super_admin";

// --- Core Admin Schemas (Mapped to Database) ---

/// AdminUser
///
/// A back-office account from the `admin_users` table. Authentication secrets are
/// managed by the login service and never pass through this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    pub enabled: bool,
    /// Loaded from `admin_user_roles`; not a column.
    #[serde(default)]
    pub role_ids: Vec<i64>,
    #[ts(type = "string | null")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(type = "string | null")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for AdminUser {
    const TABLE: &'static str = "admin_users";
    const VIRTUAL_FIELDS: &'static [&'static str] = &["role_ids"];

    fn id(&self) -> i64 {
        self.id
    }
}

/// AdminRole
///
/// A named bundle of permission keys from the `admin_roles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminRole {
    pub id: i64,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    /// Loaded from `admin_role_permissions`; not a column.
    #[serde(default)]
    pub permissions: Vec<String>,
    #[ts(type = "string | null")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(type = "string | null")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for AdminRole {
    const TABLE: &'static str = "admin_roles";
    const VIRTUAL_FIELDS: &'static [&'static str] = &["permissions"];

    fn id(&self) -> i64 {
        self.id
    }
}

/// AdminUserRole
///
/// Join row between `admin_users` and `admin_roles`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AdminUserRole {
    pub id: i64,
    pub user_id: i64,
    pub role_id: i64,
}

impl Entity for AdminUserRole {
    const TABLE: &'static str = "admin_user_roles";

    fn id(&self) -> i64 {
        self.id
    }
}

/// AdminRolePermission
///
/// One permission key granted to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AdminRolePermission {
    pub id: i64,
    pub role_id: i64,
    pub permission: String,
}

impl Entity for AdminRolePermission {
    const TABLE: &'static str = "admin_role_permissions";

    fn id(&self) -> i64 {
        self.id
    }
}

// --- Request Payloads (Input Schemas) ---

/// Query string of `GET /admin-users`. Text fields are substring matches.
#[derive(Debug, Clone, Default, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminUserListQuery {
    pub username: Option<String>,
    pub name: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateAdminUserRequest {
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    /// Defaults to enabled.
    pub enabled: Option<bool>,
    #[serde(default)]
    pub role_ids: Vec<i64>,
}

/// Empty strings and missing fields leave the column unchanged. `role_ids`
/// replaces the user's roles when present, including with an empty list.
#[derive(Debug, Clone, Default, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateAdminUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    pub enabled: Option<bool>,
    pub role_ids: Option<Vec<i64>>,
}

/// Query string of `GET /admin-roles`.
#[derive(Debug, Clone, Default, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminRoleListQuery {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateAdminRoleRequest {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// The role code is immutable once created.
#[derive(Debug, Clone, Default, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateAdminRoleRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: Option<bool>,
}

/// Body of `PUT /admin-roles/:id/permissions`. A missing list is rejected so a
/// malformed request cannot silently clear a role.
#[derive(Debug, Clone, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRolePermissionsRequest {
    pub permissions: Option<Vec<String>>,
}

// --- Response Payloads (Output Schemas) ---

#[derive(Debug, Clone, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct RolePermissionsResponse {
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: i64,
}

/// CurrentUserResponse
///
/// Profile of the calling account: the stored user plus what the request's
/// principal resolved to.
#[derive(Debug, Clone, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct CurrentUserResponse {
    pub user: AdminUser,
    pub is_super_admin: bool,
    pub permissions: Vec<String>,
}

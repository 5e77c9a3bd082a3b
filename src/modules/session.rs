use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::{
    accounts::{AccountDirectory, user_role_ids},
    auth::{TOKEN_TTL_HOURS, issue_token},
    config::AppConfig,
    error::AppError,
    models::{CurrentUserResponse, TokenResponse},
    module::{Module, ModuleDescriptor, OperationTable, RequestContext, auth_route, bind},
    response::ApiResponse,
};

/// Paths below the module group that every logged-in account may call. The
/// router puts them on the enforcement allow-list.
pub const SESSION_PATHS: [&str; 3] = ["/logout", "/refresh-token", "/current-user"];

/// SessionModule
///
/// The `/auth` group: the caller's own profile, logout and token refresh. All
/// routes need a valid principal and none needs a permission. Initial login is
/// handled by a separate identity service.
pub struct SessionModule {
    config: AppConfig,
    directory: Arc<AccountDirectory>,
}

impl SessionModule {
    pub fn new(config: AppConfig, directory: Arc<AccountDirectory>) -> Self {
        Self { config, directory }
    }

    async fn current_user(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let principal = ctx.principal()?;
        let mut user = self
            .directory
            .find_user(principal.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
        user.role_ids = user_role_ids(self.directory.store().as_ref(), user.id).await?;

        Ok(ApiResponse::success(CurrentUserResponse {
            user,
            is_super_admin: principal.is_super_admin,
            permissions: principal.permissions.iter().cloned().collect(),
        })
        .into_response())
    }

    /// Tokens are stateless, so logout only acknowledges; clients drop the token.
    async fn logout(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let principal = ctx.principal()?;
        tracing::info!(user_id = principal.user_id, "user logged out");
        Ok(ApiResponse::<()>::message("logged out").into_response())
    }

    async fn refresh_token(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let principal = ctx.principal()?;
        let token = issue_token(&self.config, principal)?;
        Ok(ApiResponse::success(TokenResponse {
            token,
            expires_in: TOKEN_TTL_HOURS * 3600,
        })
        .into_response())
    }
}

impl Module for SessionModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            name: "auth".to_string(),
            group: "/auth".to_string(),
            routes: vec![
                auth_route("GET", "/current-user", "CurrentUser"),
                auth_route("POST", "/logout", "Logout"),
                auth_route("POST", "/refresh-token", "RefreshToken"),
            ],
            permission_parent: None,
            permissions: Vec::new(),
        }
    }

    fn operations(self: Arc<Self>) -> OperationTable {
        OperationTable::new()
            .with("CurrentUser", bind(&self, |m, ctx| async move { m.current_user(ctx).await }))
            .with("Logout", bind(&self, |m, ctx| async move { m.logout(ctx).await }))
            .with("RefreshToken", bind(&self, |m, ctx| async move { m.refresh_token(ctx).await }))
    }
}

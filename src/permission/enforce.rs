use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::PermissionRegistry;
use crate::{auth::Principal, error::AppError};

/// authorize
///
/// Decides whether `principal` may call `method path`.
///
/// 1. No principal: unauthenticated.
/// 2. Principals whose kind is always trusted pass without a lookup.
/// 3. The first actionable entry (registration order) with a matching API pattern
///    names the required permission.
/// 4. No entry matched: only allow-listed paths pass, for super admins too.
/// 5. Super admins pass, everyone else needs the key in their permission set.
pub fn authorize(
    registry: &PermissionRegistry,
    principal: Option<&Principal>,
    method: &Method,
    path: &str,
) -> Result<(), AppError> {
    let principal = principal.ok_or_else(|| AppError::Unauthenticated("unauthenticated".to_string()))?;

    if !principal.kind.is_permission_checked() {
        return Ok(());
    }

    let Some(required) = registry.match_action(method, path) else {
        if registry.is_allow_listed(path) {
            return Ok(());
        }
        tracing::warn!(user_id = principal.user_id, %method, path, "no permission configured for endpoint");
        return Err(AppError::Forbidden(
            "no permission configured for this endpoint".to_string(),
        ));
    };

    if principal.has_permission(&required) {
        Ok(())
    } else {
        tracing::warn!(
            user_id = principal.user_id,
            %method,
            path,
            permission = %required,
            "permission denied"
        );
        Err(AppError::Forbidden("insufficient permission".to_string()))
    }
}

/// Checks a single permission key directly, with the super-admin bypass.
pub fn require_permission(principal: &Principal, key: &str) -> Result<(), AppError> {
    if principal.has_permission(key) {
        Ok(())
    } else {
        Err(AppError::Forbidden("insufficient permission".to_string()))
    }
}

/// enforce_permission
///
/// Route-level middleware placed on every route that declares a permission. It
/// runs after authentication, so the principal is read from request extensions.
pub async fn enforce_permission(
    State(registry): State<Arc<PermissionRegistry>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(
        &registry,
        request.extensions().get::<Principal>(),
        request.method(),
        request.uri().path(),
    )?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PrincipalKind;
    use axum::http::StatusCode;

    fn registry() -> PermissionRegistry {
        let registry = PermissionRegistry::with_allow_list(["/admin-api/auth/logout"]);
        registry
            .add_action("system:user:list", Method::GET, "/admin-api/users/:id")
            .unwrap();
        registry
            .add_action("system:user:delete", Method::DELETE, "/admin-api/users/:id")
            .unwrap();
        registry
    }

    fn principal(permissions: &[&str]) -> Principal {
        Principal {
            user_id: 9,
            username: "ops".to_string(),
            kind: PrincipalKind::Admin,
            is_super_admin: false,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn status(result: Result<(), AppError>) -> Option<StatusCode> {
        result.err().map(|e| e.status())
    }

    #[test]
    fn missing_principal_is_unauthenticated() {
        let result = authorize(&registry(), None, &Method::GET, "/admin-api/users/7");
        assert_eq!(status(result), Some(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn matching_permission_is_allowed() {
        let caller = principal(&["system:user:list"]);
        assert!(authorize(&registry(), Some(&caller), &Method::GET, "/admin-api/users/7").is_ok());
        let result = authorize(&registry(), Some(&caller), &Method::DELETE, "/admin-api/users/7");
        assert_eq!(status(result), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn unmapped_paths_need_the_allow_list() {
        let caller = principal(&[]);
        assert!(authorize(&registry(), Some(&caller), &Method::POST, "/admin-api/auth/logout").is_ok());
        let err = authorize(&registry(), Some(&caller), &Method::GET, "/admin-api/reports").unwrap_err();
        assert_eq!(err.to_string(), "no permission configured for this endpoint");
    }

    #[test]
    fn super_admin_bypasses_the_permission_set() {
        let caller = Principal {
            is_super_admin: true,
            ..principal(&[])
        };
        assert!(authorize(&registry(), Some(&caller), &Method::DELETE, "/admin-api/users/7").is_ok());
        assert!(require_permission(&caller, "anything:at:all").is_ok());
        assert!(authorize(&registry(), Some(&caller), &Method::POST, "/admin-api/auth/logout").is_ok());
        assert!(require_permission(&principal(&[]), "anything:at:all").is_err());
    }

    #[test]
    fn unmapped_paths_reject_super_admins_too() {
        let caller = Principal {
            is_super_admin: true,
            ..principal(&[])
        };
        let result = authorize(&registry(), Some(&caller), &Method::GET, "/admin-api/reports");
        assert_eq!(status(result), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn trusted_kinds_skip_the_scan() {
        let caller = Principal {
            kind: PrincipalKind::Service,
            ..principal(&[])
        };
        assert!(authorize(&registry(), Some(&caller), &Method::GET, "/admin-api/reports").is_ok());
    }
}

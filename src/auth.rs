use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::{
    accounts::AccountDirectory,
    config::{AppConfig, Env},
    error::AppError,
};

/// Lifetime of tokens minted by [`issue_token`].
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Claims
///
/// The payload expected inside an admin JSON Web Token. Tokens are signed with the
/// configured secret (HS256) and must carry the configured issuer.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the id of the row in `admin_users`.
    pub sub: i64,
    pub username: String,
    /// `admin` for interactive accounts, `service` for trusted automation.
    pub user_type: String,
    pub iss: String,
    pub exp: usize,
    pub iat: usize,
}

/// PrincipalKind
///
/// Decides whether a caller takes part in permission checks at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PrincipalKind {
    Admin,
    /// Always trusted: enforcement lets it through without scanning permissions.
    Service,
}

impl PrincipalKind {
    pub fn from_user_type(user_type: &str) -> Option<Self> {
        match user_type {
            "admin" => Some(PrincipalKind::Admin),
            "service" => Some(PrincipalKind::Service),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::Admin => "admin",
            PrincipalKind::Service => "service",
        }
    }

    pub fn is_permission_checked(self) -> bool {
        self == PrincipalKind::Admin
    }
}

/// Principal
///
/// The resolved identity of an authenticated request. It is resolved once by the
/// authentication middleware and stored in the request extensions, where the
/// account-status check, the permission enforcement step and the operations
/// read it back.
#[derive(Debug, Clone, PartialEq, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub kind: PrincipalKind,
    pub is_super_admin: bool,
    #[ts(type = "Array<string>")]
    #[schema(value_type = Vec<String>)]
    pub permissions: BTreeSet<String>,
}

impl Principal {
    /// Super admins hold every permission, whatever their permission set says.
    pub fn has_permission(&self, key: &str) -> bool {
        self.is_super_admin || self.permissions.contains(key)
    }
}

/// Principal Extractor Implementation
///
/// Handlers behind the authentication middleware can take `Principal` as an
/// argument. The middleware has already done the work; the extractor only reads
/// the extension and rejects with 401 when it is missing (the route was bound
/// without authentication).
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("unauthenticated".to_string()))
    }
}

/// PrincipalResolver
///
/// Turns an inbound request into a [`Principal`]. Any error means the caller is
/// unauthenticated.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, parts: &Parts) -> Result<Principal, AppError>;
}

/// AccountStatus
///
/// Reports whether an account may still use the API. `Ok(false)` and
/// `Err(NotFound)` both reject the request.
#[async_trait]
pub trait AccountStatus: Send + Sync {
    async fn is_enabled(&self, user_id: i64) -> Result<bool, AppError>;
}

/// JwtResolver
///
/// The production resolver. The process involves:
/// 1. Local Bypass: in `Env::Local` an `x-user-id` header naming an existing
///    account is accepted without a token.
/// 2. Token Validation: Bearer token extraction, signature, expiry and issuer checks.
/// 3. DB Lookup: the account directory loads the user's roles and permissions, so
///    a user deleted after the token was issued is rejected.
pub struct JwtResolver {
    config: AppConfig,
    directory: Arc<AccountDirectory>,
}

impl JwtResolver {
    pub fn new(config: AppConfig, directory: Arc<AccountDirectory>) -> Self {
        Self { config, directory }
    }

    fn decode_claims(&self, parts: &Parts) -> Result<Claims, AppError> {
        let unauthenticated = || AppError::Unauthenticated("unauthenticated".to_string());

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(unauthenticated)?;

        let decoding_key = DecodingKey::from_secret(self.config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => tracing::debug!("rejected expired token"),
                    other => tracing::debug!("rejected token: {:?}", other),
                }
                Err(unauthenticated())
            }
        }
    }
}

#[async_trait]
impl PrincipalResolver for JwtResolver {
    async fn resolve(&self, parts: &Parts) -> Result<Principal, AppError> {
        // 1. Local Development Bypass
        if self.config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<i64>().ok());
            if let Some(user_id) = bypass_id {
                if let Ok(principal) = self.directory.load_principal(user_id, PrincipalKind::Admin).await {
                    return Ok(principal);
                }
            }
        }

        // 2. Token Validation
        let claims = self.decode_claims(parts)?;
        let kind = PrincipalKind::from_user_type(&claims.user_type)
            .ok_or_else(|| AppError::Unauthenticated("unauthenticated".to_string()))?;

        // 3. Database Lookup
        self.directory.load_principal(claims.sub, kind).await
    }
}

/// issue_token
///
/// Signs a fresh token for `principal`. Used by the refresh endpoint; initial
/// login lives outside this service.
pub fn issue_token(config: &AppConfig, principal: &Principal) -> Result<String, AppError> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: principal.user_id,
        username: principal.username.clone(),
        user_type: principal.kind.as_str().to_string(),
        iss: config.jwt_issuer.clone(),
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Configuration(format!("token signing failed: {e}")))
}

/// AuthChain
///
/// The two collaborators every private route runs through, shared as middleware
/// state.
#[derive(Clone)]
pub struct AuthChain {
    pub resolver: Arc<dyn PrincipalResolver>,
    pub status: Arc<dyn AccountStatus>,
}

/// authenticate
///
/// Resolves the principal and stores it in the request extensions.
pub async fn authenticate(
    State(chain): State<AuthChain>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();
    let principal = chain.resolver.resolve(&parts).await?;
    parts.extensions.insert(principal);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// check_account_status
///
/// Rejects principals whose account has been disabled since the token was issued.
pub async fn check_account_status(
    State(chain): State<AuthChain>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = request
        .extensions()
        .get::<Principal>()
        .map(|p| p.user_id)
        .ok_or_else(|| AppError::Unauthenticated("unauthenticated".to_string()))?;

    match chain.status.is_enabled(user_id).await {
        Ok(true) => Ok(next.run(request).await),
        Ok(false) => Err(AppError::Unauthenticated("account disabled".to_string())),
        Err(AppError::NotFound(_)) => Err(AppError::Unauthenticated("unauthenticated".to_string())),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admins_are_permission_checked() {
        assert!(PrincipalKind::Admin.is_permission_checked());
        assert!(!PrincipalKind::Service.is_permission_checked());
        assert_eq!(PrincipalKind::from_user_type("service"), Some(PrincipalKind::Service));
        assert_eq!(PrincipalKind::from_user_type("normal"), None);
    }

    #[test]
    fn issued_tokens_decode_with_the_same_config() {
        let config = AppConfig::default();
        let principal = Principal {
            user_id: 4,
            username: "ops".into(),
            kind: PrincipalKind::Admin,
            is_super_admin: false,
            permissions: BTreeSet::new(),
        };
        let token = issue_token(&config, &principal).unwrap();

        let mut validation = Validation::default();
        validation.set_issuer(&[config.jwt_issuer.as_str()]);
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims.sub, 4);
        assert_eq!(data.claims.user_type, "admin");
    }
}

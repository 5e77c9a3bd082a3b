//! The contract between feature modules and the router: declarative route and
//! permission descriptors, the per-request context operations receive, and the
//! name-to-function dispatch table each module hands over at registration.

use axum::{
    body::Bytes,
    extract::{FromRequestParts, Query, RawPathParams, Request},
    http::{Method, Uri},
    response::Response,
};
use serde::de::DeserializeOwned;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use crate::{auth::Principal, error::AppError, permission::PermissionNode, store::Pagination};

/// Request bodies above this size are rejected before any operation runs.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// RouteDescriptor
///
/// One route a module exposes. `path` is relative to the module's group and may
/// contain `:param` segments. A route with a permission is never public.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub method: String,
    pub path: String,
    pub operation: String,
    pub permission: Option<String>,
    pub public: bool,
}

impl RouteDescriptor {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.public && self.permission.is_some() {
            return Err(AppError::Configuration(format!(
                "route {} {} is public but requires a permission",
                self.method, self.path
            )));
        }
        if self.operation.is_empty() {
            return Err(AppError::Configuration(format!(
                "route {} {} names no operation",
                self.method, self.path
            )));
        }
        Ok(())
    }

    /// The HTTP method, parsed. Only the standard verbs are accepted.
    pub fn http_method(&self) -> Result<Method, AppError> {
        match self.method.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "OPTIONS" => Ok(Method::OPTIONS),
            other => Err(AppError::Configuration(format!(
                "unsupported HTTP method `{other}` on {}",
                self.path
            ))),
        }
    }
}

/// A route reachable without authentication.
pub fn public_route(method: &str, path: &str, operation: &str) -> RouteDescriptor {
    RouteDescriptor {
        method: method.to_string(),
        path: path.to_string(),
        operation: operation.to_string(),
        permission: None,
        public: true,
    }
}

/// A route that needs a logged-in, enabled account but no permission.
pub fn auth_route(method: &str, path: &str, operation: &str) -> RouteDescriptor {
    RouteDescriptor {
        public: false,
        ..public_route(method, path, operation)
    }
}

/// A route guarded by `permission`.
pub fn perm_route(method: &str, path: &str, operation: &str, permission: &str) -> RouteDescriptor {
    RouteDescriptor {
        permission: Some(permission.to_string()),
        ..auth_route(method, path, operation)
    }
}

/// ModuleDescriptor
///
/// Everything the router needs to know about a module. `permission_parent` of
/// `None` places `permissions` at the top level of the tree.
#[derive(Debug, Clone, Default)]
pub struct ModuleDescriptor {
    pub name: String,
    pub group: String,
    pub routes: Vec<RouteDescriptor>,
    pub permission_parent: Option<String>,
    pub permissions: Vec<PermissionNode>,
}

/// RequestContext
///
/// What an operation sees of the request: method, URI, path parameters, the
/// resolved principal (private routes only) and the raw body.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub params: HashMap<String, String>,
    pub principal: Option<Principal>,
    pub body: Bytes,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            params: HashMap::new(),
            principal: None,
            body: Bytes::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_json(mut self, body: &serde_json::Value) -> Self {
        self.body = Bytes::from(body.to_string());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Splits an axum request into a context. Path parameters are absent (not an
    /// error) when the request did not go through a parameterized route.
    pub async fn from_request(request: Request) -> Result<Self, AppError> {
        let (mut parts, body) = request.into_parts();
        let params = match RawPathParams::from_request_parts(&mut parts, &()).await {
            Ok(raw) => raw
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            Err(_) => HashMap::new(),
        };
        let principal = Principal::from_request_parts(&mut parts, &()).await.ok();
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| AppError::BadRequest("request body too large".to_string()))?;
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            params,
            principal,
            body,
        })
    }

    /// The `:id` path parameter, a positive 32-bit integer.
    pub fn id(&self) -> Result<i64, AppError> {
        self.params
            .get("id")
            .and_then(|raw| raw.parse::<u32>().ok())
            .filter(|id| *id > 0)
            .map(i64::from)
            .ok_or_else(|| AppError::BadRequest("invalid id".to_string()))
    }

    pub fn query<Q: DeserializeOwned>(&self) -> Result<Q, AppError> {
        Query::<Q>::try_from_uri(&self.uri)
            .map(|Query(q)| q)
            .map_err(|e| AppError::BadRequest(format!("invalid query: {}", e.body_text())))
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::from_uri(&self.uri)
    }

    pub fn json<B: DeserializeOwned>(&self) -> Result<B, AppError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AppError::BadRequest(format!("invalid request body: {e}")))
    }

    pub fn principal(&self) -> Result<&Principal, AppError> {
        self.principal
            .as_ref()
            .ok_or_else(|| AppError::Unauthenticated("unauthenticated".to_string()))
    }
}

pub type Operation =
    Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Result<Response, AppError>> + Send + Sync>;

/// OperationTable
///
/// The explicit dispatch table a module exposes: operation name to function.
#[derive(Clone, Default)]
pub struct OperationTable {
    operations: HashMap<String, Operation>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F, Fut>(mut self, name: &str, operation: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, AppError>> + Send + 'static,
    {
        self.operations
            .insert(name.to_string(), Arc::new(move |ctx| Box::pin(operation(ctx))));
        self
    }

    /// Adds every entry of `other`, replacing same-named entries.
    pub fn merge(mut self, other: OperationTable) -> Self {
        self.operations.extend(other.operations);
        self
    }

    pub fn get(&self, name: &str) -> Option<Operation> {
        self.operations.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Adapts a method on a shared target into an operation closure.
pub fn bind<E, F, Fut>(target: &Arc<E>, f: F) -> impl Fn(RequestContext) -> Fut + Send + Sync + 'static
where
    E: Send + Sync + 'static,
    F: Fn(Arc<E>, RequestContext) -> Fut + Send + Sync + 'static,
{
    let target = target.clone();
    move |ctx| f(target.clone(), ctx)
}

/// Module
///
/// A feature unit. `descriptor` must be pure; `operations` is called once at
/// registration and must name every operation the descriptor's routes reference.
pub trait Module: Send + Sync {
    fn descriptor(&self) -> ModuleDescriptor;
    fn operations(self: Arc<Self>) -> OperationTable;
}

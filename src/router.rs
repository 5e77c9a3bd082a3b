//! Materializes module descriptors into axum routes.
//!
//! Routes are bound at their full path (`prefix + group + path`) on one flat
//! router, so route-level middleware and permission patterns see the same path
//! the client sent.

use axum::{
    Router,
    extract::Request,
    http::Method,
    middleware,
    routing::{MethodFilter, MethodRouter, on},
};
use std::{collections::HashSet, sync::Arc};
use utoipa::openapi::{
    OpenApi, OpenApiBuilder, ResponseBuilder,
    path::{HttpMethod, OperationBuilder, Paths},
};

use crate::{
    auth::{AuthChain, authenticate, check_account_status},
    error::AppError,
    module::{Module, Operation, RequestContext, RouteDescriptor},
    permission::{
        PermissionRegistry,
        enforce::enforce_permission,
        matcher::{join_paths, to_router_path},
    },
};

/// ModuleRouter
///
/// The registration phase of the server. Each [`register`](Self::register) call:
///
/// 1. Adds the module's permission subtree under its parent key.
/// 2. Resolves every route's operation in the module's dispatch table.
/// 3. Binds public routes bare, and private routes behind authentication and
///    the account-status check.
/// 4. Adds permission enforcement to routes that declare a permission and
///    records the route as an actionable entry for that key.
///
/// [`finish`](Self::finish) freezes the permission registry and hands back the
/// router plus the OpenAPI paths of every bound route.
pub struct ModuleRouter {
    prefix: String,
    registry: Arc<PermissionRegistry>,
    auth: AuthChain,
    router: Router,
    paths: Paths,
    bound: HashSet<(Method, String)>,
}

impl ModuleRouter {
    pub fn new(prefix: &str, registry: Arc<PermissionRegistry>, auth: AuthChain) -> Self {
        Self {
            prefix: prefix.to_string(),
            registry,
            auth,
            router: Router::new(),
            paths: Paths::new(),
            bound: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PermissionRegistry> {
        &self.registry
    }

    /// Registers one module. Every error is a startup configuration error.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<(), AppError> {
        let descriptor = module.descriptor();
        let operations = module.operations();

        let parent = descriptor.permission_parent.as_deref().unwrap_or("");
        if !descriptor.permissions.is_empty() {
            self.registry
                .add_subtree(parent, descriptor.permissions.clone())
                .map_err(|e| AppError::Configuration(format!("module `{}`: {e}", descriptor.name)))?;
        }

        for route in &descriptor.routes {
            route.validate()?;
            let operation = operations.get(&route.operation).ok_or_else(|| {
                AppError::Configuration(format!(
                    "module `{}` has no operation `{}` for {} {}",
                    descriptor.name, route.operation, route.method, route.path
                ))
            })?;
            self.bind(&descriptor.name, &descriptor.group, route, operation)?;
        }

        tracing::info!(
            module = %descriptor.name,
            routes = descriptor.routes.len(),
            "module registered"
        );
        Ok(())
    }

    fn bind(&mut self, module: &str, group: &str, route: &RouteDescriptor, operation: Operation) -> Result<(), AppError> {
        let method = route.http_method()?;
        let full_path = join_paths(&[&self.prefix, group, &route.path]);
        let router_path = to_router_path(&full_path);

        if !self.bound.insert((method.clone(), router_path.clone())) {
            return Err(AppError::Configuration(format!("duplicate route {method} {full_path}")));
        }

        if route.public {
            self.registry.allow(&full_path)?;
        }
        if let Some(permission) = &route.permission {
            if !self.registry.contains(permission) {
                tracing::warn!(%permission, path = %full_path, "route permission is not in the permission tree");
            }
            self.registry.add_action(permission, method.clone(), &full_path)?;
        }

        let filter = MethodFilter::try_from(method.clone())
            .map_err(|e| AppError::Configuration(format!("{full_path}: {e}")))?;
        let mut method_router: MethodRouter = on(filter, move |request: Request| {
            let operation = operation.clone();
            async move {
                let ctx = RequestContext::from_request(request).await?;
                operation(ctx).await
            }
        });

        // Layers added later run first: authenticate, then account status, then enforcement.
        if route.permission.is_some() {
            method_router =
                method_router.route_layer(middleware::from_fn_with_state(self.registry.clone(), enforce_permission));
        }
        if !route.public {
            method_router = method_router
                .route_layer(middleware::from_fn_with_state(self.auth.clone(), check_account_status))
                .route_layer(middleware::from_fn_with_state(self.auth.clone(), authenticate));
        }

        self.router = std::mem::take(&mut self.router).route(&router_path, method_router);
        self.document(module, &router_path, &method, route);

        tracing::debug!(
            %method,
            path = %full_path,
            operation = %route.operation,
            permission = route.permission.as_deref().unwrap_or("-"),
            public = route.public,
            "route bound"
        );
        Ok(())
    }

    fn document(&mut self, module: &str, router_path: &str, method: &Method, route: &RouteDescriptor) {
        let Some(http_method) = openapi_method(method) else {
            return;
        };
        let mut description = match &route.permission {
            Some(permission) => format!("Requires `{permission}`."),
            None if route.public => "Public.".to_string(),
            None => "Requires a logged-in account.".to_string(),
        };
        description.push_str(" Responses use the `{ code, msg, data }` envelope.");

        let operation = OperationBuilder::new()
            .operation_id(Some(format!("{module}.{}", route.operation)))
            .summary(Some(route.operation.clone()))
            .description(Some(description))
            .tag(module)
            .response("200", ResponseBuilder::new().description("success").build())
            .build();
        self.paths.add_path_operation(router_path, vec![http_method], operation);
    }

    /// Ends registration: freezes the registry and returns the router and the
    /// generated OpenAPI document.
    pub fn finish(self) -> (Router, OpenApi) {
        self.registry.freeze();
        tracing::info!(
            routes = self.bound.len(),
            permissions = self.registry.flatten().len(),
            "route table frozen"
        );
        (self.router, OpenApiBuilder::new().paths(self.paths).build())
    }
}

fn openapi_method(method: &Method) -> Option<HttpMethod> {
    match *method {
        Method::GET => Some(HttpMethod::Get),
        Method::POST => Some(HttpMethod::Post),
        Method::PUT => Some(HttpMethod::Put),
        Method::PATCH => Some(HttpMethod::Patch),
        Method::DELETE => Some(HttpMethod::Delete),
        Method::HEAD => Some(HttpMethod::Head),
        Method::OPTIONS => Some(HttpMethod::Options),
        _ => None,
    }
}

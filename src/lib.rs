use axum::{Router, http::HeaderName, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core engine: errors, responses, the store, permissions and the CRUD engine.
pub mod error;
pub mod response;
pub mod store;
pub mod permission;
pub mod module;
pub mod crud;
pub mod router;

// Identity: token verification, principals and the account directory.
pub mod auth;
pub mod accounts;
pub mod config;

// Feature modules and their data model.
pub mod models;
pub mod modules;

// --- Public Re-exports ---

pub use accounts::AccountDirectory;
pub use config::AppConfig;
pub use error::AppError;
pub use permission::PermissionRegistry;
pub use store::{MemoryStore, PgStore, StoreState};

use auth::{AuthChain, JwtResolver};
use module::Module;
use modules::{base_permissions, default_modules, session::SESSION_PATHS};
use permission::matcher::join_paths;
use router::ModuleRouter;

/// ApiDoc
///
/// The static part of the OpenAPI document: shared schemas and the health probe.
/// Module routes are appended at startup by the [`ModuleRouter`], since they only
/// exist once modules have registered. Served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(health),
    components(
        schemas(
            models::AdminUser, models::AdminRole, models::CreateAdminUserRequest,
            models::UpdateAdminUserRequest, models::CreateAdminRoleRequest,
            models::UpdateAdminRoleRequest, models::UpdateRolePermissionsRequest,
            models::RolePermissionsResponse, models::TokenResponse, models::CurrentUserResponse,
            crud::IdsRequest, crud::EnabledRequest, permission::PermissionNode,
            auth::Principal, auth::PrincipalKind, error::ErrorBody,
        )
    ),
    tags(
        (name = "admin-engine", description = "Modular admin back-office API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The long-lived services every module is built from. The permission registry
/// and account directory are created here so callers can inspect them after the
/// router has been assembled.
#[derive(Clone)]
pub struct AppState {
    /// Configuration: the loaded, immutable environment configuration.
    pub config: AppConfig,
    /// Data store shared by every module and the account directory.
    pub store: StoreState,
    /// Permission tree, actionable entries and allow-list.
    pub registry: Arc<PermissionRegistry>,
    /// Principal and account-status lookups.
    pub directory: Arc<AccountDirectory>,
}

impl AppState {
    pub fn new(config: AppConfig, store: StoreState) -> Self {
        let allow_list = SESSION_PATHS
            .iter()
            .map(|path| join_paths(&[&config.api_prefix, "/auth", path]));
        Self {
            registry: Arc::new(PermissionRegistry::with_allow_list(allow_list)),
            directory: Arc::new(AccountDirectory::new(store.clone(), &config.super_admin_username)),
            config,
            store,
        }
    }
}

/// health
///
/// Liveness probe, outside every module and middleware.
#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up", body = String)))]
async fn health() -> &'static str {
    "ok"
}

/// create_router
///
/// Builds the server with the stock modules (session, admin users, admin roles).
pub fn create_router(state: AppState) -> Result<Router, AppError> {
    let modules = default_modules(
        &state.config,
        state.store.clone(),
        state.directory.clone(),
        state.registry.clone(),
    );
    create_router_with_modules(state, modules)
}

/// create_router_with_modules
///
/// Assembles the application's routing structure from `modules`, applies the
/// global middleware and ends the registration phase.
///
/// 1. Base permission tree.
/// 2. Module registration (permission subtrees, routes, per-route middleware).
/// 3. Registry freeze, OpenAPI merge, Swagger UI and the health probe.
/// 4. Observability, correlation and CORS layers.
pub fn create_router_with_modules(state: AppState, modules: Vec<Arc<dyn Module>>) -> Result<Router, AppError> {
    // 1. Base Permission Tree
    state.registry.set_base(base_permissions())?;

    // 2. Module Registration
    let chain = AuthChain {
        resolver: Arc::new(JwtResolver::new(state.config.clone(), state.directory.clone())),
        status: state.directory.clone(),
    };
    let mut module_router = ModuleRouter::new(&state.config.api_prefix, state.registry.clone(), chain);
    for module in modules {
        module_router.register(module)?;
    }

    // 3. Serving Phase
    let (module_routes, module_doc) = module_router.finish();
    let mut openapi = ApiDoc::openapi();
    openapi.merge(module_doc);

    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .route("/health", get(health))
        .merge(module_routes);

    // 4. Observability and Correlation Layers
    Ok(base_router
        .layer(
            ServiceBuilder::new()
                // 4a. Request ID Generation: a UUID for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 4b. Request Tracing: one span per request, carrying the request id.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 4c. Request ID Propagation: echo x-request-id back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors))
}

/// trace_span_logger
///
/// Helper used by `TraceLayer` to create the request span. It extracts the
/// `x-request-id` header (if present) and records it next to the HTTP method and URI,
/// so every log line of a request is correlated by one id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

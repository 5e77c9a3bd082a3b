use admin_engine::{
    AppState, MemoryStore, PgStore, StoreState,
    config::{AppConfig, Env, StoreBackend},
    create_router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// The asynchronous entry point: configuration, logging, the data store, module
/// registration and the HTTP server, in that order.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging Filter Setup
    // RUST_LOG wins; otherwise a verbose default suited to local development.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "admin_engine=debug,tower_http=info,axum=trace".into());

    // 3. Initialize Logging based on Environment
    match config.env {
        Env::Local => {
            // LOCAL: pretty output for humans.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // PROD: JSON lines for the log aggregator.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Data Store Initialization
    let store: StoreState = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.db_url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
            let pg = PgStore::new(pool);

            // LOCAL-ONLY: create the admin tables on first run.
            if config.env == Env::Local {
                pg.ensure_schema()
                    .await
                    .expect("FATAL: Failed to apply the admin schema.");
            }
            Arc::new(pg)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    // 5. Module Registration & Router Assembly
    // Registration errors (unknown operation, duplicate route, missing permission
    // parent) are configuration bugs and stop the process here.
    let bind_addr = config.bind_addr.clone();
    let local = config.env == Env::Local;
    let state = AppState::new(config, store);

    // LOCAL-ONLY: make sure the super-admin account exists so the x-user-id bypass
    // has someone to act as.
    if local {
        state
            .directory
            .ensure_super_admin()
            .await
            .expect("FATAL: Failed to create the super-admin account.");
    }

    let app = create_router(state).expect("FATAL: Module registration failed.");

    // 6. Server Startup
    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    axum::serve(listener, app).await.expect("FATAL: HTTP server error.");
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, header},
    middleware,
    response::Response,
    routing::get,
};
use tower_http::cors::CorsLayer;

use super::actions::{ErrorReporter, TracingReporter};
use super::api::{self, AppState};
use super::db::{DbHandle, ShopDb};
use super::ws;
use crate::config::ShopConfig;

/// Configuration for the shop server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_config(&ShopConfig::default())
    }
}

impl ServerConfig {
    pub fn from_config(config: &ShopConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.server.db_path.clone(),
            dev_mode: config.server.dev_mode,
        }
    }
}

/// Every response is fresh data; "Refresh Data" must never hit a cache.
async fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Build the full application router: pages, API and WebSocket.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_tx = state.ws_tx.clone();

    api::api_router()
        .route(
            "/ws",
            get(move |ws_upgrade| ws::ws_handler_with_sender(ws_upgrade, ws_tx)),
        )
        .layer(middleware::map_response(no_store))
        .with_state(state)
}

/// Create the database file and run migrations.
pub fn init_database(db_path: &std::path::Path) -> Result<ShopDb> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    ShopDb::new(db_path).context("Failed to initialize shop database")
}

/// Start the shop server and run until Ctrl+C.
pub async fn start_server(server: ServerConfig, config: ShopConfig) -> Result<()> {
    let db = init_database(&server.db_path)?;
    let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingReporter);
    let shop_name = config.shop.name.clone();
    let state = Arc::new(AppState::new(DbHandle::new(db), config, reporter));

    let mut app = build_router(state);

    if server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if server.dev_mode { "0.0.0.0" } else { server.host.as_str() };
    let addr = format!("{}:{}", host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        shop = %shop_name,
        %local_addr,
        db_path = %server.db_path.display(),
        "repair shop server running"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState, SharedState};
use super::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL, DataCache};
use super::db::CourseDb;
use super::ws;
use crate::config::AppConfig;

/// Configuration for the course server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
    pub webhook_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".coursehub/coursehub.db"),
            dev_mode: false,
            cache_enabled: true,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            cache_ttl: DEFAULT_TTL,
            webhook_secret: None,
        }
    }
}

impl From<&AppConfig> for ServerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            dev_mode: config.server.dev_mode,
            cache_enabled: config.cache.enabled,
            cache_max_entries: config.cache.max_entries,
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
            webhook_secret: config.checkout.webhook_secret.clone(),
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database, then serve until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = CourseDb::new(&config.db_path).context("Failed to initialize course database")?;
    let cache = DataCache::new(config.cache_enabled)
        .with_limits(config.cache_max_entries, config.cache_ttl);
    if config.webhook_secret.is_none() {
        warn!("checkout.webhook_secret is unset, purchase fulfillment is disabled");
    }
    let state = Arc::new(AppState::new(db, cache).with_webhook_secret(config.webhook_secret));
    let app = build_router(state, config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, db = %config.db_path.display(), dev_mode = config.dev_mode, "coursehub listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C, shutting down");
        return;
    }
    info!("shutting down");
}

//! HTTP front end for the orchestrator.
//!
//! `api.rs` holds the route handlers; this file wires the router, the
//! optional dev CORS layer and the listener with graceful shutdown.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::orchestrator::Orchestrator;
use api::AppState;

/// Listener settings for `buildbay serve`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for a separately served front end
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(orchestrator: Arc<Orchestrator>, dev_mode: bool) -> Router {
    let state = Arc::new(AppState { orchestrator });
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve until Ctrl-C. Jobs still running at shutdown are abandoned with the runtime.
pub async fn start_server(config: ServerConfig, orchestrator: Orchestrator) -> Result<()> {
    orchestrator
        .config()
        .ensure_directories()
        .context("Failed to prepare state directories")?;

    let app = build_router(Arc::new(orchestrator), config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode = config.dev_mode, "serving");
    println!("buildbay running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl-C; shutting down"),
    }
}

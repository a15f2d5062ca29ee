//! HTTP server for the Tessera store
//!
//! Routes map one-to-one onto engine operations. Every handler passes the
//! gatekeeper before it touches the store; failures are rendered by
//! `ApiError`. Requests are traced and bounded by the configured timeout.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers::*;
use crate::engine::Engine;
use crate::error::{Result, TesseraError};

/// Shared application state for all handlers
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// The HTTP front of one engine
pub struct ApiServer {
    engine: Arc<Engine>,
}

impl ApiServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let config = &self.engine.config().server;
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .map_err(|e| TesseraError::Config(format!("Invalid listen address: {e}")))?;

        let app = create_router(Arc::new(AppState {
            engine: self.engine.clone(),
        }))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeout_secs)));

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TesseraError::Storage(format!("Failed to bind to {addr}: {e}")))?;

        tracing::info!("Tessera API listening on {addr}");
        if !self.engine.gatekeeper().config().enabled {
            tracing::warn!("API keys are disabled; every client may write");
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TesseraError::Storage(format!("Server error: {e}")))?;

        tracing::info!("API server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route(
            "/records/{key}",
            put(put_record_handler)
                .get(get_record_handler)
                .delete(delete_record_handler),
        )
        .route("/records/{key}/versions", get(versions_handler))
        .route(
            "/records/{key}/restore/{version}",
            post(restore_version_handler),
        )
        .route("/records/{key}/link", post(link_handler))
        .route("/records/{key}/relationships", get(relationships_handler))
        .route("/records/{key}/thread", get(thread_handler))
        .route("/search", post(search_handler))
        .route(
            "/backups",
            post(create_backup_handler).get(list_backups_handler),
        )
        .route("/backups/prune", post(prune_backups_handler))
        .route("/backups/{name}/restore", post(restore_backup_handler))
        .route("/auth/keys", post(issue_key_handler).get(list_keys_handler))
        .route("/auth/keys/{key}", delete(revoke_key_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

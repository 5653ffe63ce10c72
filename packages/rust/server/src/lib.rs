//! HTTP surface for the research pipeline.
//!
//! Exposes blocking and streaming research endpoints plus history access,
//! all backed by the runners from `deepresearch-core`.

pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use deepresearch_core::{AsyncRunner, ProgressStreamer, SynchronousRunner};
use deepresearch_shared::{DeepResearchError, HistoryStore, Result};

pub use error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub sync_runner: SynchronousRunner,
    pub async_runner: AsyncRunner,
    pub streamer: ProgressStreamer,
    pub history: Arc<dyn HistoryStore>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/research", post(routes::research))
        .route("/research/async", post(routes::research_async))
        .route("/research/stream/:task_id", get(routes::stream))
        .route(
            "/api/history",
            get(routes::list_history).delete(routes::clear_history),
        )
        .route("/api/research/:id", get(routes::get_research))
        .with_state(state)
}

/// Serve until Ctrl-C, then abort any in-flight tasks.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let registry = state.async_runner.registry().clone();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DeepResearchError::Network(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "research server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DeepResearchError::Internal(format!("server error: {e}")))?;

    let pending = registry.len();
    registry.abort_all();
    info!(pending, "research server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

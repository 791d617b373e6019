//! Read-only HTTP query interface for the dashboard.
//!
//! - `GET /api/stats` — every known service with its cumulative counters
//! - `GET /` — plain-text liveness line

mod state;
mod stats;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(stats::index))
        .route("/api/stats", get(stats::get_stats))
        .with_state(state)
}

pub async fn bind(listen: SocketAddr) -> Result<TcpListener, AppError> {
    TcpListener::bind(listen)
        .await
        .map_err(|e| AppError::Io(format!("failed to bind {listen}: {e}")))
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Query endpoint listening on {addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("Query endpoint stopped");
    Ok(())
}

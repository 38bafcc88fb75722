//! Admin HTTP surface
//!
//! `/health` answers `ok` while the dispatcher runs, `/metrics` exposes the
//! process counters, and `POST /sync` requests an on-demand reconcile pass.
//! The sync request is delivered to the dispatcher loop via a notify handle
//! so reconciliation stays single-threaded.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{Notify, broadcast};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::Metrics;
use crate::Result;

/// Shared state of the admin handlers
pub struct AdminContext {
    /// Process counters
    pub metrics: Arc<Metrics>,
    /// Wakes the dispatcher loop for an on-demand sync
    pub sync_trigger: Arc<Notify>,
}

/// Build the admin router
pub fn router(context: Arc<AdminContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/sync", post(sync_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

/// Serve the admin endpoints until shutdown
pub async fn serve(
    listener: TcpListener,
    context: Arc<AdminContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = router(context);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("Admin server stopped");
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(context): State<Arc<AdminContext>>) -> impl IntoResponse {
    Json(context.metrics.snapshot())
}

async fn sync_handler(State(context): State<Arc<AdminContext>>) -> impl IntoResponse {
    context.sync_trigger.notify_one();
    (StatusCode::ACCEPTED, Json(json!({ "status": "sync requested" })))
}

//! Liveness endpoint reporting the current queue depth.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    queue: QueueDepth,
}

#[derive(Debug, Serialize)]
struct QueueDepth {
    pending: usize,
    processing: usize,
    failed: usize,
}

/// GET /health
///
/// Answers from memory only, so it stays up while the store is unreachable.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.queue.statistics().await;
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        queue: QueueDepth {
            pending: stats.pending_messages,
            processing: stats.processing_messages,
            failed: stats.failed_messages,
        },
    })
}

//! Message submission and queue administration routes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Message, QueueStatistics};

use crate::requests::{EmailRequest, PushRequest, SmsRequest};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/messages/sms", post(send_sms))
        .route("/api/messages/email", post(send_email))
        .route("/api/messages/push", post(send_push))
        .route("/api/messages/status", get(queue_status))
        .route("/api/messages/pending", get(list_pending))
        .route(
            "/api/messages/failed",
            get(list_failed).delete(clear_failed),
        )
        .route("/api/messages/{id}", get(get_message))
        .route("/api/messages/{id}/retry", post(retry_message))
}

/// POST /api/messages/sms — Queue an SMS.
async fn send_sms(
    State(state): State<AppState>,
    Json(request): Json<SmsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let message = request.into_message(state.config.default_max_retries)?;
    enqueue(&state, message).await
}

/// POST /api/messages/email — Queue an email.
async fn send_email(
    State(state): State<AppState>,
    Json(request): Json<EmailRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let message = request.into_message(state.config.default_max_retries)?;
    enqueue(&state, message).await
}

/// POST /api/messages/push — Queue a push notification.
async fn send_push(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let message = request.into_message(state.config.default_max_retries)?;
    enqueue(&state, message).await
}

async fn enqueue(state: &AppState, message: Message) -> Result<Json<serde_json::Value>, AppError> {
    let id = message.id;
    state.queue.enqueue(message).await?;
    Ok(Json(json!({ "message_id": id, "status": "enqueued" })))
}

/// GET /api/messages/status — Bucket counts and per-kind breakdown.
async fn queue_status(State(state): State<AppState>) -> Json<QueueStatistics> {
    Json(state.queue.statistics().await)
}

/// GET /api/messages/pending — Pending messages in dispatch order.
async fn list_pending(State(state): State<AppState>) -> Json<Vec<Message>> {
    Json(state.queue.list_pending().await)
}

/// GET /api/messages/failed — Messages that exhausted their retry budget.
async fn list_failed(State(state): State<AppState>) -> Json<Vec<Message>> {
    Json(state.queue.list_failed().await)
}

/// DELETE /api/messages/failed — Drop the failed set from memory.
async fn clear_failed(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.queue.clear_failed().await;
    Json(json!({ "cleared": cleared }))
}

/// GET /api/messages/:id — A message in any bucket.
async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>, AppError> {
    state
        .queue
        .find(id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", id)))
}

/// POST /api/messages/:id/retry — Requeue a failed message with a fresh budget.
async fn retry_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let message = state.queue.retry(id).await?;
    Ok(Json(json!({ "message_id": message.id, "status": "retried" })))
}

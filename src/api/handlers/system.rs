//! System endpoints: health check and queue backlog.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{HealthResponse, QueueStatus, QueueStatusResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, ServerError};
use crate::queue::{ACCOUNT_NOTIFY_QUEUE, CHAT_EVENTS_QUEUE, queue_key};

/// Queues reported by `GET /queues`.
const REPORTED_QUEUES: [&str; 2] = [ACCOUNT_NOTIFY_QUEUE, CHAT_EVENTS_QUEUE];

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, uptime and the number of live WebSocket connections.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: now.to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: (now - state.started_at).num_seconds(),
            connections: state.connections.len().await,
        }),
    )
}

/// `GET /queues` — Broker queue backlog.
///
/// # Errors
///
/// Returns [`ServerError::Broker`] if the broker cannot be reached.
#[utoipa::path(
    get,
    path = "/queues",
    tag = "System",
    summary = "Queue backlog",
    description = "Returns the number of items waiting in each work queue consumed by the gateway.",
    responses(
        (status = 200, description = "Queue backlog", body = QueueStatusResponse),
        (status = 500, description = "Broker unavailable", body = ErrorResponse),
    )
)]
pub async fn queues_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
    let mut queues = Vec::with_capacity(REPORTED_QUEUES.len());
    for name in REPORTED_QUEUES {
        let length = state.broker.list_len(&queue_key(name)).await?;
        queues.push(QueueStatus {
            name: name.to_string(),
            length,
        });
    }
    let total = queues.iter().map(|q| q.length).sum();
    Ok((StatusCode::OK, Json(QueueStatusResponse { queues, total })))
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/queues", get(queues_handler))
}

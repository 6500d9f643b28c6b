//! Health and queue status DTOs.

use serde::Serialize;
use utoipa::ToSchema;

/// Response body for `GET /health`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"healthy"` when the endpoint answers.
    pub status: String,
    /// Current server time (RFC 3339).
    pub timestamp: String,
    /// Crate version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_secs: i64,
    /// Number of live WebSocket connections.
    pub connections: usize,
}

/// Backlog of one broker queue.
#[derive(Debug, Serialize, ToSchema)]
pub struct QueueStatus {
    /// Queue name (without the key prefix).
    pub name: String,
    /// Items waiting.
    pub length: usize,
}

/// Response body for `GET /queues`.
#[derive(Debug, Serialize, ToSchema)]
pub struct QueueStatusResponse {
    /// Per-queue backlog.
    pub queues: Vec<QueueStatus>,
    /// Total items waiting.
    pub total: usize,
}

//! Gateway error types with HTTP status code mapping.
//!
//! [`ServerError`] is the central error type. Connection workers log it
//! and close the affected connection; the admin API maps it to a
//! structured JSON response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::ConnectionId;
use crate::protocol::{HandshakeError, ProtocolError};
use crate::store::StoreError;

/// Structured JSON error response body.
///
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "connection not found: 4f1c...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category              | HTTP Status               |
/// |-----------|-----------------------|---------------------------|
/// | 1000–1999 | Protocol / request    | 400 Bad Request           |
/// | 2000–2999 | State / not found     | 404 / 409 / 504           |
/// | 3000–3999 | Server / collaborator | 500 Internal Server Error |
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Framing violation; fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid upgrade request; fatal to the connection.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Keyed entity store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Socket or other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Write attempted on a connection that is not open.
    #[error("connection {0} is not open")]
    ConnectionClosed(ConnectionId),

    /// No live connection with the given id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// The connection is already bound to another account.
    #[error("connection {connection_id} is already bound to account {account_id}")]
    AccountAlreadyAttached {
        /// Connection that rejected the account.
        connection_id: ConnectionId,
        /// Account currently attached.
        account_id: i64,
    },

    /// Push or pop on a queue no consumer is registered for.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Message broker failure.
    #[error("broker error: {0}")]
    Broker(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Protocol(_) => 1001,
            Self::Handshake(_) => 1002,
            Self::Serialization(_) => 1003,
            Self::UnknownQueue(_) => 1004,
            Self::ConnectionNotFound(_) => 2001,
            Self::ConnectionClosed(_) => 2002,
            Self::AccountAlreadyAttached { .. } => 2003,
            Self::Store(StoreError::NotFound { .. }) => 2004,
            Self::Store(StoreError::Timeout { .. }) => 2005,
            Self::Store(StoreError::Disposed { .. } | StoreError::IllegalState { .. }) => 2006,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::Broker(_) => 3002,
            Self::Io(_) => 3003,
            Self::Config(_) => 3004,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Protocol(_)
            | Self::Handshake(_)
            | Self::Serialization(_)
            | Self::UnknownQueue(_) => StatusCode::BAD_REQUEST,
            Self::ConnectionNotFound(_) | Self::Store(StoreError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            Self::ConnectionClosed(_)
            | Self::AccountAlreadyAttached { .. }
            | Self::Store(StoreError::Disposed { .. } | StoreError::IllegalState { .. }) => {
                StatusCode::CONFLICT
            }
            Self::Store(StoreError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_)
            | Self::Persistence(_)
            | Self::Broker(_)
            | Self::Io(_)
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if the error must terminate the connection it
    /// occurred on.
    #[must_use]
    pub const fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Handshake(_) | Self::Io(_) | Self::ConnectionClosed(_)
        )
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

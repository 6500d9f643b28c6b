//! Live connection inspection.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{ConnectionDto, ConnectionListResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, ServerError};

/// `GET /connections` — List live connections with session snapshots.
#[utoipa::path(
    get,
    path = "/connections",
    tag = "Connections",
    summary = "List live connections",
    description = "Returns every live WebSocket connection with its state, account and a lock-free session snapshot.",
    responses(
        (status = 200, description = "Live connections", body = ConnectionListResponse),
    )
)]
pub async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    let mut connections: Vec<ConnectionDto> = state
        .connections
        .all()
        .await
        .iter()
        .map(|connection| {
            ConnectionDto::new(connection, state.sessions.get_unsafe(&connection.id()))
        })
        .collect();
    connections.sort_by_key(|c| c.session.as_ref().map(|s| s.connected_at));

    let identified = connections.iter().filter(|c| c.account.is_some()).count();
    let total = connections.len();
    (
        StatusCode::OK,
        Json(ConnectionListResponse {
            connections,
            total,
            identified,
        }),
    )
}

/// `GET /connections/{id}` — One live connection.
///
/// # Errors
///
/// Returns [`ServerError::ConnectionNotFound`] if no live connection has
/// that id.
#[utoipa::path(
    get,
    path = "/connections/{id}",
    tag = "Connections",
    summary = "Get a connection",
    description = "Returns one live WebSocket connection by id.",
    params(("id" = String, Path, description = "Connection id (UUID)")),
    responses(
        (status = 200, description = "Connection found", body = ConnectionDto),
        (status = 404, description = "No live connection with that id", body = ErrorResponse),
    )
)]
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let connection = state
        .connections
        .get_by_str(&id)
        .await
        .ok_or(ServerError::ConnectionNotFound(id))?;
    let session = state.sessions.get_unsafe(&connection.id());
    Ok((StatusCode::OK, Json(ConnectionDto::new(&connection, session))))
}

/// Connection routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/connections", get(list_connections))
        .route("/connections/{id}", get(get_connection))
}

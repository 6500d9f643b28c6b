//! Connection DTOs for list and detail endpoints.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{ConnectionId, Session};
use crate::persistence::Account;
use crate::ws::{Connection, ConnectionState};

/// One live connection as seen by the admin API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionDto {
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// Remote socket address, when known.
    pub peer: Option<String>,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Authenticated account, if the client identified.
    pub account: Option<Account>,
    /// Session snapshot. May be stale; read without locking.
    pub session: Option<Session>,
}

impl ConnectionDto {
    /// Builds the DTO from a connection and its session snapshot.
    #[must_use]
    pub fn new(connection: &Connection, session: Option<Session>) -> Self {
        Self {
            connection_id: connection.id(),
            peer: connection.peer().map(|addr| addr.to_string()),
            state: connection.state(),
            account: connection.account().cloned(),
            session,
        }
    }
}

/// Response body for `GET /connections`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionListResponse {
    /// Live connections.
    pub connections: Vec<ConnectionDto>,
    /// Number of live connections.
    pub total: usize,
    /// Number of connections bound to an account.
    pub identified: usize,
}

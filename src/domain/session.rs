//! Per-connection session state kept in the keyed entity store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::ConnectionId;
use crate::store::EntityStore;

/// Session store keyed by connection.
pub type SessionStore = EntityStore<ConnectionId, Session>;

/// Mutable state of one client session.
///
/// Hubs mutate it only through an [`crate::store::EntityGuard`], so two
/// handlers never update the same session concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Session {
    /// Connection owning the session.
    pub connection_id: ConnectionId,

    /// Account attached by a successful identify, if any.
    pub account_id: Option<i64>,

    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,

    /// Last time the client sent a ping or identified.
    pub last_seen: DateTime<Utc>,
}

impl Session {
    /// Creates a fresh, unauthenticated session.
    #[must_use]
    pub fn new(connection_id: ConnectionId) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            account_id: None,
            connected_at: now,
            last_seen: now,
        }
    }

    /// Records client activity.
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

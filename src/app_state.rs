//! Shared application state injected into the admin API handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::broker::Broker;
use crate::domain::SessionStore;
use crate::ws::ConnectionList;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live WebSocket connections.
    pub connections: ConnectionList,
    /// Per-connection sessions.
    pub sessions: SessionStore,
    /// Message broker client.
    pub broker: Arc<dyn Broker>,
    /// When the process started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Bundles the shared handles, stamping the start time.
    #[must_use]
    pub fn new(
        connections: ConnectionList,
        sessions: SessionStore,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            connections,
            sessions,
            broker,
            started_at: Utc::now(),
        }
    }
}

//! Heartbeat hub.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::domain::SessionStore;
use crate::error::ServerError;
use crate::protocol::{OpCode, Packet};
use crate::store::StoreError;
use crate::ws::{Connection, Hub};

/// Answers `Ping` with `Pong` and records the activity on the session.
#[derive(Debug, Clone)]
pub struct PingHub {
    sessions: SessionStore,
}

impl PingHub {
    /// Creates the hub.
    #[must_use]
    pub fn new(sessions: SessionStore) -> Self {
        Self { sessions }
    }
}

impl Hub for PingHub {
    type Payload = ();

    fn handle<'a>(
        &'a self,
        connection: &'a Arc<Connection>,
        (): (),
    ) -> BoxFuture<'a, Result<(), ServerError>> {
        async move {
            match self.sessions.get_with(connection.id(), false, false).await {
                Ok(mut session) => {
                    session.with_mut(|slot| {
                        if let Some(session) = slot {
                            session.touch();
                        }
                    })?;
                }
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            connection.send(&Packet::bare(OpCode::Pong)).await
        }
        .boxed()
    }
}

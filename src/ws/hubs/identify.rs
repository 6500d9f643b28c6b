//! Token authentication hub.

use std::fmt;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::broker::Broker;
use crate::domain::{Session, SessionStore};
use crate::error::ServerError;
use crate::persistence::AccountDirectory;
use crate::protocol::packet::IdentifyData;
use crate::queue::{ACCOUNT_NOTIFY_QUEUE, AccountNotification, QueueSender};
use crate::ws::{Connection, Hub};

/// Broker list holding the outstanding single-use session tokens.
pub const TOKEN_LIST: &str = "lobby:tokens";

/// Notification pushed to a connection after it identifies.
pub const CONNECTED_MESSAGE: &str = "You have been connected to the server.";

/// Returns the broker key holding the account id of `token`.
#[must_use]
pub fn token_key(token: &str) -> String {
    format!("{TOKEN_LIST}:{token}")
}

/// Binds a connection to an account using a session token issued by the
/// account service.
///
/// The token must be listed in [`TOKEN_LIST`] and is consumed on use. Any
/// missing piece ends the exchange silently; the client gets no reply.
pub struct IdentifyHub {
    broker: Arc<dyn Broker>,
    directory: Arc<dyn AccountDirectory>,
    sessions: SessionStore,
    queue: QueueSender,
}

impl IdentifyHub {
    /// Creates the hub.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        directory: Arc<dyn AccountDirectory>,
        sessions: SessionStore,
        queue: QueueSender,
    ) -> Self {
        Self {
            broker,
            directory,
            sessions,
            queue,
        }
    }

    async fn identify(
        &self,
        connection: &Arc<Connection>,
        token: String,
    ) -> Result<(), ServerError> {
        let connection_id = connection.id();

        // Removal is the single-use check: only the caller that takes the
        // token out of the list may go on.
        if self.broker.list_remove(TOKEN_LIST, &token).await? == 0 {
            tracing::debug!(%connection_id, "identify with unknown token");
            return Ok(());
        }

        let Some(account_id) = self
            .broker
            .get(&token_key(&token))
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok())
        else {
            tracing::debug!(%connection_id, "token carries no account id");
            return Ok(());
        };

        let Some(account) = self.directory.find_account(account_id).await? else {
            tracing::debug!(%connection_id, account_id, "token account does not exist");
            return Ok(());
        };

        connection.attach_account(account)?;
        let mut session = self.sessions.get(connection_id).await?;
        session.with_mut(|slot| {
            let session = slot.get_or_insert_with(|| Session::new(connection_id));
            session.account_id = Some(account_id);
            session.touch();
        })?;
        session.release();

        tracing::info!(%connection_id, account_id, "connection identified");

        self.queue
            .push(
                ACCOUNT_NOTIFY_QUEUE,
                &AccountNotification {
                    target: Some(connection_id.to_string()),
                    account_id,
                    message: CONNECTED_MESSAGE.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}

impl Hub for IdentifyHub {
    type Payload = IdentifyData;

    fn handle<'a>(
        &'a self,
        connection: &'a Arc<Connection>,
        payload: IdentifyData,
    ) -> BoxFuture<'a, Result<(), ServerError>> {
        async move {
            let Some(token) = payload.token else {
                return Ok(());
            };
            self.identify(connection, token).await
        }
        .boxed()
    }
}

impl fmt::Debug for IdentifyHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifyHub")
            .field("broker", &self.broker)
            .field("directory", &self.directory)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

//! `accounts:notify`: text notifications addressed to accounts or to one
//! connection.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::QueueConsumer;
use crate::error::ServerError;
use crate::protocol::packet::NotificationData;
use crate::protocol::{DispatchType, Packet};
use crate::ws::{ConnectionList, ConnectionSet};

/// Queue name consumed by [`AccountQueue`].
pub const ACCOUNT_NOTIFY_QUEUE: &str = "accounts:notify";

/// Item of the `accounts:notify` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountNotification {
    /// Connection id to deliver to. When absent, every connection of
    /// `account_id` receives the notification.
    #[serde(default)]
    pub target: Option<String>,

    /// Account the notification is for.
    pub account_id: i64,

    /// Text to show.
    pub message: String,
}

/// Delivers [`AccountNotification`]s as `NOTIFICATION` dispatches.
#[derive(Debug, Clone)]
pub struct AccountQueue {
    connections: ConnectionList,
}

impl AccountQueue {
    /// Creates the consumer over the live connection list.
    #[must_use]
    pub fn new(connections: ConnectionList) -> Self {
        Self { connections }
    }
}

impl QueueConsumer for AccountQueue {
    type Item = AccountNotification;

    fn process(&self, item: AccountNotification) -> BoxFuture<'_, Result<(), ServerError>> {
        async move {
            let targets = match &item.target {
                Some(target) => match self.connections.get_by_str(target).await {
                    Some(connection) => ConnectionSet::from(vec![connection]),
                    None => {
                        tracing::debug!(%target, "notification target is gone");
                        return Ok(());
                    }
                },
                None => self.connections.for_account(item.account_id).await,
            };

            let packet = Packet::dispatch(
                DispatchType::Notification,
                NotificationData {
                    message: item.message,
                },
            );
            let delivered = targets.send(&packet).await;
            tracing::debug!(account_id = item.account_id, delivered, "account notified");
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, DuplexStream};

    use super::*;
    use crate::persistence::Account;
    use crate::protocol::frame::{self, Decoded};
    use crate::ws::Connection;

    async fn open_connection(account_id: i64) -> (Arc<Connection>, DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let connection = Connection::new(None, Box::new(server));
        let _ = connection.attach_account(Account {
            id: account_id,
            username: format!("user{account_id}"),
        });
        let Ok(()) = connection.complete_handshake("").await else {
            panic!("handshake failed");
        };
        (Arc::new(connection), client)
    }

    async fn next_text(client: &mut DuplexStream, pending: &mut Vec<u8>) -> serde_json::Value {
        loop {
            if let Ok(Decoded::Frame { frame, consumed }) = frame::decode_frame(pending) {
                pending.drain(..consumed);
                let Ok(value) = serde_json::from_slice(&frame.payload) else {
                    panic!("frame is not JSON");
                };
                return value;
            }
            let mut chunk = [0_u8; 1024];
            let Ok(read) = client.read(&mut chunk).await else {
                panic!("read failed");
            };
            assert!(read > 0, "stream closed");
            pending.extend_from_slice(chunk.get(..read).unwrap_or_default());
        }
    }

    #[tokio::test]
    async fn targeted_notification_reaches_only_the_target() {
        let connections = ConnectionList::new();
        let (first, mut first_client) = open_connection(1).await;
        let (second, _second_client) = open_connection(1).await;
        connections.insert(Arc::clone(&first)).await;
        connections.insert(Arc::clone(&second)).await;

        let queue = AccountQueue::new(connections);
        let item = AccountNotification {
            target: Some(first.id().to_string()),
            account_id: 1,
            message: "hi".to_string(),
        };
        assert!(queue.process(item).await.is_ok());

        let mut pending = Vec::new();
        let hello = next_text(&mut first_client, &mut pending).await;
        assert_eq!(hello["op"], 1);
        let notification = next_text(&mut first_client, &mut pending).await;
        assert_eq!(
            notification,
            serde_json::json!({"op": 0, "t": "NOTIFICATION", "d": {"message": "hi"}})
        );
    }

    #[tokio::test]
    async fn missing_target_is_ignored() {
        let queue = AccountQueue::new(ConnectionList::new());
        let item = AccountNotification {
            target: Some("not-a-connection".to_string()),
            account_id: 1,
            message: "hi".to_string(),
        };
        assert!(queue.process(item).await.is_ok());
    }

    #[test]
    fn target_defaults_to_none() {
        let Ok(item) =
            serde_json::from_str::<AccountNotification>(r#"{"account_id":3,"message":"m"}"#)
        else {
            panic!("decode failed");
        };
        assert_eq!(item.target, None);
        assert_eq!(item.account_id, 3);
    }
}

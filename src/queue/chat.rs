//! `chat:events`: channel joins and messages fanned out to members.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::QueueConsumer;
use crate::error::ServerError;
use crate::persistence::{Account, AccountDirectory, ChatChannel};
use crate::protocol::packet::{ChatChannelAddData, ChatMessageData};
use crate::protocol::{DispatchType, Packet};
use crate::ws::ConnectionList;

/// Queue name consumed by [`ChatQueue`].
pub const CHAT_EVENTS_QUEUE: &str = "chat:events";

/// Kind of chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatEventKind {
    /// `account` joined `channel`.
    Join,
    /// `account` posted `data` in `channel`.
    Message,
    /// Anything else; ignored.
    #[serde(other)]
    Unknown,
}

/// Item of the `chat:events` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Event kind (`type` on the wire).
    #[serde(rename = "type")]
    pub kind: ChatEventKind,

    /// Channel the event happened in.
    pub channel: ChatChannel,

    /// Account that caused the event.
    pub account: Account,

    /// Event body; the chat message for [`ChatEventKind::Message`].
    #[serde(default)]
    pub data: Option<Value>,
}

/// Forwards chat events to the affected connections.
#[derive(Debug, Clone)]
pub struct ChatQueue {
    connections: ConnectionList,
    directory: Arc<dyn AccountDirectory>,
}

impl ChatQueue {
    /// Creates the consumer.
    #[must_use]
    pub fn new(connections: ConnectionList, directory: Arc<dyn AccountDirectory>) -> Self {
        Self {
            connections,
            directory,
        }
    }

    async fn on_join(&self, event: ChatEvent) {
        let targets = self.connections.for_account(event.account.id).await;
        if targets.is_empty() {
            return;
        }
        let packet = Packet::dispatch(
            DispatchType::ChatChannelAdd,
            ChatChannelAddData {
                channel: event.channel,
            },
        );
        targets.send(&packet).await;
    }

    async fn on_message(&self, event: ChatEvent) -> Result<(), ServerError> {
        let Some(message) = event.data else {
            tracing::debug!(channel_id = event.channel.id, "chat message without body");
            return Ok(());
        };

        let members = self.directory.channel_members(event.channel.id).await?;
        let packet = Packet::dispatch(DispatchType::ChatMessage, ChatMessageData { message });

        let mut delivered = 0;
        for member in members {
            delivered += self.connections.for_account(member).await.send(&packet).await;
        }
        tracing::debug!(channel_id = event.channel.id, delivered, "chat message fanned out");
        Ok(())
    }
}

impl QueueConsumer for ChatQueue {
    type Item = ChatEvent;

    fn process(&self, event: ChatEvent) -> BoxFuture<'_, Result<(), ServerError>> {
        async move {
            match event.kind {
                ChatEventKind::Join => {
                    self.on_join(event).await;
                    Ok(())
                }
                ChatEventKind::Message => self.on_message(event).await,
                ChatEventKind::Unknown => {
                    tracing::debug!(channel_id = event.channel.id, "ignoring chat event");
                    Ok(())
                }
            }
        }
        .boxed()
    }
}

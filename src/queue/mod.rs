//! Queue processing: broker lists consumed by typed consumers.
//!
//! Hubs never deliver cross-connection events themselves. They push an
//! item onto a queue through [`QueueSender`] and the [`QueueProcessor`]
//! task fans it out to the right connections.

pub mod accounts;
pub mod chat;
pub mod processor;

/// Prefix of every queue key in the broker.
pub const QUEUE_PREFIX: &str = "lobby.queue:";

pub use accounts::{ACCOUNT_NOTIFY_QUEUE, AccountNotification, AccountQueue};
pub use chat::{CHAT_EVENTS_QUEUE, ChatEvent, ChatEventKind, ChatQueue};
pub use processor::{DEFAULT_POLL_INTERVAL, QueueConsumer, QueueProcessor, QueueSender, queue_key};

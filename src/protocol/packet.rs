//! Application envelope carried in text frames.
//!
//! Every message is a JSON object:
//!
//! ```json
//! { "op": 2, "d": { "token": "..." } }
//! { "op": 0, "t": "NOTIFICATION", "d": { "message": "..." } }
//! ```
//!
//! `op` is required; `t` is only present on dispatches; `d` is only
//! present for messages that carry data.

use serde::{Deserialize, Serialize};

use crate::domain::ConnectionId;
use crate::persistence::models::ChatChannel;

/// Application-level operation code (the `op` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum OpCode {
    /// Server-initiated event; the `t` field names the event.
    Dispatch = 0,
    /// Greeting sent right after the handshake.
    Hello = 1,
    /// Client authentication with a session token.
    Identify = 2,
    /// Client heartbeat.
    Ping = 3,
    /// Server heartbeat reply.
    Pong = 4,
}

/// An integer that is not a defined [`OpCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("undefined opcode {0}")]
pub struct UnknownOpCode(pub i64);

impl TryFrom<i64> for OpCode {
    type Error = UnknownOpCode;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Hello),
            2 => Ok(Self::Identify),
            3 => Ok(Self::Ping),
            4 => Ok(Self::Pong),
            other => Err(UnknownOpCode(other)),
        }
    }
}

impl From<OpCode> for i64 {
    fn from(op: OpCode) -> Self {
        op as Self
    }
}

/// Event name of a [`OpCode::Dispatch`] packet (the `t` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchType {
    /// A text notification for an account.
    Notification,
    /// A message posted in a chat channel.
    ChatMessage,
    /// The account was added to a chat channel.
    ChatChannelAdd,
}

/// Outbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet<T> {
    /// Operation code.
    pub op: OpCode,
    /// Dispatch event name.
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchType>,
    /// Payload.
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl Packet<()> {
    /// A packet with no payload.
    #[must_use]
    pub const fn bare(op: OpCode) -> Self {
        Self {
            op,
            dispatch: None,
            data: None,
        }
    }
}

impl<T> Packet<T> {
    /// A packet carrying `data`.
    #[must_use]
    pub const fn with_data(op: OpCode, data: T) -> Self {
        Self {
            op,
            dispatch: None,
            data: Some(data),
        }
    }

    /// A dispatch event.
    #[must_use]
    pub const fn dispatch(kind: DispatchType, data: T) -> Self {
        Self {
            op: OpCode::Dispatch,
            dispatch: Some(kind),
            data: Some(data),
        }
    }
}

/// Payload of [`OpCode::Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloData {
    /// Identifier assigned to the connection.
    pub connection_id: ConnectionId,
}

/// Payload of [`OpCode::Identify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyData {
    /// Single-use session token issued by the account service.
    pub token: Option<String>,
}

/// Payload of a [`DispatchType::Notification`] dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Text shown to the user.
    pub message: String,
}

/// Payload of a [`DispatchType::ChatMessage`] dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageData {
    /// The chat message as produced by the chat service.
    pub message: serde_json::Value,
}

/// Payload of a [`DispatchType::ChatChannelAdd`] dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChannelAddData {
    /// The channel the account joined.
    pub channel: ChatChannel,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trips_as_integer() {
        assert_eq!(serde_json::to_string(&OpCode::Ping).ok().as_deref(), Some("3"));
        assert_eq!(serde_json::from_str::<OpCode>("2").ok(), Some(OpCode::Identify));
        assert!(serde_json::from_str::<OpCode>("9999").is_err());
        assert_eq!(OpCode::try_from(9999), Err(UnknownOpCode(9999)));
    }

    #[test]
    fn bare_packet_omits_optional_fields() {
        let Ok(json) = serde_json::to_string(&Packet::bare(OpCode::Pong)) else {
            panic!("serialization failed");
        };
        assert_eq!(json, r#"{"op":4}"#);
    }

    #[test]
    fn dispatch_packet_carries_event_name() {
        let packet = Packet::dispatch(
            DispatchType::Notification,
            NotificationData {
                message: "hi".to_string(),
            },
        );
        let Ok(json) = serde_json::to_value(&packet) else {
            panic!("serialization failed");
        };
        assert_eq!(
            json,
            serde_json::json!({"op": 0, "t": "NOTIFICATION", "d": {"message": "hi"}})
        );
    }
}

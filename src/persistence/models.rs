//! Records returned by the persistence layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A row from the `accounts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// Numeric account id.
    pub id: i64,
    /// Display name.
    pub username: String,
}

/// A chat channel as carried in chat events and dispatches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChatChannel {
    /// Numeric channel id.
    pub id: i64,
    /// Channel name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

//! # lobby-gateway
//!
//! Real-time WebSocket gateway for a game lobby.
//!
//! Clients connect over a raw RFC 6455 subset (text frames, 16-bit
//! lengths), receive a Hello with their connection id, authenticate with
//! a single-use token and then receive notifications and chat events that
//! other services push through the message broker.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket)                     Admin (HTTP)
//!     │                                        │
//!     ├── ConnectionServer (ws/)               ├── Router (api/)
//!     │     └── worker per connection          │
//!     │           ├── FrameCodec (protocol/)   │
//!     │           └── HubRegistry ─► hubs      │
//!     │                                        │
//!     ├── ConnectionList ◄─────────────────────┤
//!     ├── SessionStore = EntityStore (store/) ◄┘
//!     │
//!     ├── QueueProcessor (queue/) ◄── Broker lists (broker/)
//!     │
//!     └── AccountDirectory (persistence/) ── PostgreSQL
//! ```

pub mod api;
pub mod app_state;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod queue;
pub mod store;
pub mod ws;

//! WebSocket layer: accept loop, per-connection workers, live connection
//! addressing and the opcode → hub routing table.
//!
//! Clients speak raw RFC 6455 text frames over TCP on their own listener;
//! the admin HTTP API is served separately (see [`crate::api`]).

pub mod connection;
pub mod connection_list;
pub mod hub;
pub mod hubs;
pub mod server;

pub use connection::{Connection, ConnectionState};
pub use connection_list::{ConnectionList, ConnectionSet};
pub use hub::{DispatchOutcome, Hub, HubRegistry, Registration};
pub use server::{ConnectionServer, serve_connection};

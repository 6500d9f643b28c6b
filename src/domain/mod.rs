//! Domain layer: connection identity and session state.
//!
//! Sessions are stored in an [`crate::store::EntityStore`] keyed by
//! [`ConnectionId`], giving handlers one exclusive mutator per session.

pub mod connection_id;
pub mod session;

pub use connection_id::ConnectionId;
pub use session::{Session, SessionStore};

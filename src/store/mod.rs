//! Generic keyed state shared across concurrently running handlers.
//!
//! The store has no network knowledge; the gateway uses it for sessions
//! keyed by [`crate::domain::ConnectionId`], but any subsystem needing one
//! active mutator per logical entity can build on it.

pub mod entity_store;

pub use entity_store::{DEFAULT_LOCK_TIMEOUT, EntityGuard, EntityStore, MAX_ATTEMPTS, StoreError};

//! Message broker boundary.
//!
//! The gateway talks to a list-backed key/value broker: named lists used
//! as FIFO queues (push right, pop left) and plain string keys used for
//! session tokens. [`Broker`] is object safe so the concrete client is
//! injected at startup. [`RedisBroker`] is the production client;
//! [`MemoryBroker`] backs tests and local runs.

pub mod memory;
pub mod redis;

use futures_util::future::BoxFuture;

use crate::error::ServerError;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// Operations the gateway needs from the external broker.
pub trait Broker: Send + Sync + std::fmt::Debug {
    /// Appends `value` to the list at `key`, returning the new length.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if the broker cannot be reached.
    fn list_push(&self, key: &str, value: String) -> BoxFuture<'_, Result<usize, ServerError>>;

    /// Removes and returns the first element of the list at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if the broker cannot be reached.
    fn list_pop(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, ServerError>>;

    /// Returns the length of the list at `key` (0 when absent).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if the broker cannot be reached.
    fn list_len(&self, key: &str) -> BoxFuture<'_, Result<usize, ServerError>>;

    /// Returns the index of the first occurrence of `value` in the list.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if the broker cannot be reached.
    fn list_position(
        &self,
        key: &str,
        value: &str,
    ) -> BoxFuture<'_, Result<Option<usize>, ServerError>>;

    /// Removes every occurrence of `value`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if the broker cannot be reached.
    fn list_remove(&self, key: &str, value: &str) -> BoxFuture<'_, Result<usize, ServerError>>;

    /// Reads the string at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if the broker cannot be reached.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, ServerError>>;

    /// Writes the string at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if the broker cannot be reached.
    fn set(&self, key: &str, value: String) -> BoxFuture<'_, Result<(), ServerError>>;

    /// Deletes `key` whatever its type. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if the broker cannot be reached.
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, ServerError>>;
}

//! Persistence layer: account lookup and chat channel membership.
//!
//! [`AccountDirectory`] is the boundary the gateway calls through. The
//! PostgreSQL implementation uses `sqlx::PgPool`; [`MemoryDirectory`]
//! backs tests and runs with persistence disabled.

pub mod memory;
pub mod models;
pub mod postgres;

use futures_util::future::BoxFuture;

use crate::error::ServerError;

pub use memory::MemoryDirectory;
pub use models::{Account, ChatChannel};
pub use postgres::PostgresDirectory;

/// Read-only account and membership lookups.
pub trait AccountDirectory: Send + Sync + std::fmt::Debug {
    /// Resolves an account by numeric id.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Persistence`] if the lookup fails.
    fn find_account(&self, id: i64) -> BoxFuture<'_, Result<Option<Account>, ServerError>>;

    /// Lists the account ids that are members of a chat channel.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Persistence`] if the lookup fails.
    fn channel_members(&self, channel_id: i64) -> BoxFuture<'_, Result<Vec<i64>, ServerError>>;
}

//! PostgreSQL implementation of the account directory.

use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{Account, AccountDirectory};
use crate::error::ServerError;

/// PostgreSQL-backed directory using `sqlx::PgPool`.
///
/// Expects the tables:
///
/// ```sql
/// CREATE TABLE accounts (id BIGINT PRIMARY KEY, username TEXT NOT NULL);
/// CREATE TABLE chat_channel_members (
///     channel_id BIGINT NOT NULL,
///     account_id BIGINT NOT NULL REFERENCES accounts (id),
///     PRIMARY KEY (channel_id, account_id)
/// );
/// ```
#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    /// Creates a directory over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds a lazily connecting pool for `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Persistence`] if the URL is invalid.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)
            .map_err(|e| ServerError::Persistence(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

impl AccountDirectory for PostgresDirectory {
    fn find_account(&self, id: i64) -> BoxFuture<'_, Result<Option<Account>, ServerError>> {
        async move {
            let row = sqlx::query_as::<_, (i64, String)>(
                "SELECT id, username FROM accounts WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServerError::Persistence(e.to_string()))?;

            Ok(row.map(|(id, username)| Account { id, username }))
        }
        .boxed()
    }

    fn channel_members(&self, channel_id: i64) -> BoxFuture<'_, Result<Vec<i64>, ServerError>> {
        async move {
            sqlx::query_scalar::<_, i64>(
                "SELECT account_id FROM chat_channel_members \
                 WHERE channel_id = $1 ORDER BY account_id",
            )
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ServerError::Persistence(e.to_string()))
        }
        .boxed()
    }
}

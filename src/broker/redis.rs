//! [`Broker`] backed by a Redis server.

use std::fmt;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Cmd, FromRedisValue, RedisError};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::Broker;
use crate::error::ServerError;

/// Broker speaking to Redis through a reconnecting [`ConnectionManager`].
///
/// The account service writes session tokens and queue items into the
/// same server, so this is the broker the gateway runs against.
#[derive(Clone)]
pub struct RedisBroker {
    manager: ConnectionManager,
}

impl RedisBroker {
    /// Connects to the Redis server at `url` (`redis://host:port/db`).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Broker`] if `url` is not a valid Redis URL or
    /// the initial connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, ServerError> {
        let client = Client::open(url).map_err(broker_error)?;
        let manager = ConnectionManager::new(client).await.map_err(broker_error)?;
        Ok(Self { manager })
    }

    fn query<T>(&self, cmd: Cmd) -> BoxFuture<'_, Result<T, ServerError>>
    where
        T: FromRedisValue + Send + 'static,
    {
        let mut connection = self.manager.clone();
        async move { cmd.query_async(&mut connection).await.map_err(broker_error) }.boxed()
    }
}

fn command(name: &str, args: &[&str]) -> Cmd {
    let mut cmd = ::redis::cmd(name);
    for arg in args {
        cmd.arg(*arg);
    }
    cmd
}

fn broker_error(e: RedisError) -> ServerError {
    ServerError::Broker(e.to_string())
}

impl Broker for RedisBroker {
    fn list_push(&self, key: &str, value: String) -> BoxFuture<'_, Result<usize, ServerError>> {
        self.query(command("RPUSH", &[key, value.as_str()]))
    }

    fn list_pop(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, ServerError>> {
        self.query(command("LPOP", &[key]))
    }

    fn list_len(&self, key: &str) -> BoxFuture<'_, Result<usize, ServerError>> {
        self.query(command("LLEN", &[key]))
    }

    fn list_position(
        &self,
        key: &str,
        value: &str,
    ) -> BoxFuture<'_, Result<Option<usize>, ServerError>> {
        self.query(command("LPOS", &[key, value]))
    }

    fn list_remove(&self, key: &str, value: &str) -> BoxFuture<'_, Result<usize, ServerError>> {
        // count 0: every occurrence
        self.query(command("LREM", &[key, "0", value]))
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, ServerError>> {
        self.query(command("GET", &[key]))
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'_, Result<(), ServerError>> {
        self.query(command("SET", &[key, value.as_str()]))
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, ServerError>> {
        self.query::<usize>(command("DEL", &[key]))
            .map(|deleted| deleted.map(|n| n > 0))
            .boxed()
    }
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker").finish_non_exhaustive()
    }
}

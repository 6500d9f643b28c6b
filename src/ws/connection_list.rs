//! Live connection set and cross-connection addressing.
//!
//! Hubs and queue consumers use [`ConnectionList`] to find the clients a
//! server-initiated event should reach, then push to all of them through
//! a [`ConnectionSet`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use super::connection::Connection;
use crate::domain::ConnectionId;

/// Shared registry of live connections, keyed by [`ConnectionId`].
///
/// Cloning is cheap; all clones see the same set.
#[derive(Debug, Clone, Default)]
pub struct ConnectionList {
    connections: Arc<RwLock<HashMap<ConnectionId, Arc<Connection>>>>,
}

impl ConnectionList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection.
    pub async fn insert(&self, connection: Arc<Connection>) {
        self.connections
            .write()
            .await
            .insert(connection.id(), connection);
    }

    /// Removes a connection, returning it if it was present.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(&id)
    }

    /// Looks a connection up by id.
    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&id).map(Arc::clone)
    }

    /// Looks a connection up by the string form of its id. Malformed ids
    /// resolve to `None`.
    pub async fn get_by_str(&self, id: &str) -> Option<Arc<Connection>> {
        let id = id.parse::<ConnectionId>().ok()?;
        self.get(id).await
    }

    /// Returns every connection matching `predicate`.
    pub async fn query<F>(&self, predicate: F) -> ConnectionSet
    where
        F: Fn(&Connection) -> bool,
    {
        let connections = self.connections.read().await;
        ConnectionSet(
            connections
                .values()
                .filter(|connection| predicate(connection))
                .map(Arc::clone)
                .collect(),
        )
    }

    /// Returns every connection authenticated as `account_id`.
    pub async fn for_account(&self, account_id: i64) -> ConnectionSet {
        self.query(|connection| connection.account_id() == Some(account_id))
            .await
    }

    /// Returns every live connection.
    pub async fn all(&self) -> ConnectionSet {
        self.query(|_| true).await
    }

    /// Returns the number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connection is live.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Closes every live connection. Workers remove them from the list as
    /// they wind down.
    pub async fn close_all(&self) {
        for connection in self.all().await {
            connection.close().await;
        }
    }
}

/// A selection of connections, typically the result of a query.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSet(Vec<Arc<Connection>>);

impl ConnectionSet {
    /// Sends `packet` to every connection in the set.
    ///
    /// Delivery failures are logged and skipped. Returns the number of
    /// connections the packet reached.
    pub async fn send<T: Serialize + ?Sized>(&self, packet: &T) -> usize {
        let mut delivered = 0;
        for connection in &self.0 {
            match connection.send(packet).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(connection_id = %connection.id(), error = %e, "broadcast skipped connection");
                }
            }
        }
        delivered
    }

    /// Returns the ids of the selected connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.0.iter().map(|connection| connection.id()).collect()
    }

    /// Returns the number of selected connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the selected connections.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Connection>> {
        self.0.iter()
    }
}

impl From<Vec<Arc<Connection>>> for ConnectionSet {
    fn from(connections: Vec<Arc<Connection>>) -> Self {
        Self(connections)
    }
}

impl IntoIterator for ConnectionSet {
    type Item = Arc<Connection>;
    type IntoIter = std::vec::IntoIter<Arc<Connection>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConnectionSet {
    type Item = &'a Arc<Connection>;
    type IntoIter = std::slice::Iter<'a, Arc<Connection>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

//! One live client connection.
//!
//! A [`Connection`] owns the write half of the socket, the lifecycle state
//! (`AwaitingHandshake → Open → Closed`) and the account cell filled in by
//! a successful identify. The read half stays with the connection worker
//! in [`super::server`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};

use crate::domain::ConnectionId;
use crate::error::ServerError;
use crate::persistence::Account;
use crate::protocol::frame;
use crate::protocol::packet::{HelloData, OpCode, Packet};

/// Write half of a client stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, waiting for the HTTP upgrade request.
    AwaitingHandshake = 0,
    /// Handshake answered; frames flow both ways.
    Open = 1,
    /// Stream shut down; no further writes.
    Closed = 2,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::AwaitingHandshake,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// A client connection shared between its worker, hubs and queue
/// consumers (always behind an `Arc`).
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    state: AtomicU8,
    account: OnceLock<Account>,
    writer: Mutex<Option<BoxedWriter>>,
    closed: Notify,
}

impl Connection {
    /// Wraps the write half of a freshly accepted stream.
    #[must_use]
    pub fn new(peer: Option<SocketAddr>, writer: BoxedWriter) -> Self {
        Self::with_id(ConnectionId::new(), peer, writer)
    }

    /// Like [`Connection::new`] with a caller-chosen identifier.
    #[must_use]
    pub fn with_id(id: ConnectionId, peer: Option<SocketAddr>, writer: BoxedWriter) -> Self {
        Self {
            id,
            peer,
            state: AtomicU8::new(ConnectionState::AwaitingHandshake as u8),
            account: OnceLock::new(),
            writer: Mutex::new(Some(writer)),
            closed: Notify::new(),
        }
    }

    /// Returns the connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address, when known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` once the handshake completed and until closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns `true` after [`Connection::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Returns the authenticated account, if any.
    #[must_use]
    pub fn account(&self) -> Option<&Account> {
        self.account.get()
    }

    /// Returns the authenticated account id, if any.
    #[must_use]
    pub fn account_id(&self) -> Option<i64> {
        self.account().map(|account| account.id)
    }

    /// Binds the connection to an account. Binding the same account again
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AccountAlreadyAttached`] if a different
    /// account is already bound.
    pub fn attach_account(&self, account: Account) -> Result<(), ServerError> {
        let requested = account.id;
        match self.account.set(account) {
            Ok(()) => Ok(()),
            Err(_) => match self.account_id() {
                Some(current) if current == requested => Ok(()),
                Some(current) => Err(ServerError::AccountAlreadyAttached {
                    connection_id: self.id,
                    account_id: current,
                }),
                None => Err(ServerError::Internal(
                    "account cell rejected a value while empty".to_string(),
                )),
            },
        }
    }

    /// Writes the upgrade response, opens the connection and greets the
    /// client with a Hello packet.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ConnectionClosed`] if the connection is not
    /// awaiting a handshake, or an I/O error from the socket.
    pub async fn complete_handshake(&self, response: &str) -> Result<(), ServerError> {
        if self.state() != ConnectionState::AwaitingHandshake {
            return Err(ServerError::ConnectionClosed(self.id));
        }
        self.write_raw(response.as_bytes()).await?;
        self.state
            .compare_exchange(
                ConnectionState::AwaitingHandshake as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| ServerError::ConnectionClosed(self.id))?;

        tracing::debug!(connection_id = %self.id, "handshake completed");
        self.send(&Packet::with_data(
            OpCode::Hello,
            HelloData {
                connection_id: self.id,
            },
        ))
        .await
    }

    /// Serializes `packet` to JSON and sends it as one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ConnectionClosed`] before the handshake or
    /// after close, [`ServerError::Protocol`] for oversized payloads, and
    /// I/O errors from the socket.
    pub async fn send<T: Serialize + ?Sized>(&self, packet: &T) -> Result<(), ServerError> {
        if !self.is_open() {
            return Err(ServerError::ConnectionClosed(self.id));
        }
        let payload = serde_json::to_vec(packet)?;
        let bytes = frame::encode_text_frame(&payload)?;
        self.write_raw(&bytes).await
    }

    /// Sends an empty close frame. Failures are ignored.
    pub async fn send_close(&self) {
        if self.is_open() {
            let _ = self.write_raw(&frame::encode_close_frame()).await;
        }
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), ServerError> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(ServerError::ConnectionClosed(self.id));
        };

        let written = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = written {
            writer.take();
            drop(writer);
            self.mark_closed();
            return Err(e.into());
        }
        Ok(())
    }

    /// Shuts the stream down and wakes the worker. Idempotent.
    pub async fn close(&self) {
        let stream = self.writer.lock().await.take();
        if let Some(mut stream) = stream {
            let _ = stream.shutdown().await;
        }
        self.mark_closed();
    }

    fn mark_closed(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous != ConnectionState::Closed as u8 {
            self.closed.notify_one();
        }
    }

    /// Completes once the connection has been closed.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.closed.notified().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("account_id", &self.account_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::handshake;

    fn account(id: i64) -> Account {
        Account {
            id,
            username: format!("user{id}"),
        }
    }

    #[test]
    fn account_is_attached_at_most_once() {
        let conn = Connection::new(None, Box::new(tokio::io::sink()));
        assert!(conn.account().is_none());

        assert!(conn.attach_account(account(1)).is_ok());
        assert!(conn.attach_account(account(1)).is_ok());
        assert!(matches!(
            conn.attach_account(account(2)),
            Err(ServerError::AccountAlreadyAttached { account_id: 1, .. })
        ));
        assert_eq!(conn.account_id(), Some(1));
    }

    #[tokio::test]
    async fn send_before_handshake_is_rejected() {
        let conn = Connection::new(None, Box::new(tokio::io::sink()));
        let result = conn.send(&Packet::bare(OpCode::Pong)).await;
        assert!(matches!(result, Err(ServerError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn handshake_writes_response_then_hello() {
        let id = ConnectionId::new();
        let response = handshake::upgrade_response("abc");
        let hello = format!(r#"{{"op":1,"d":{{"connection_id":"{id}"}}}}"#);
        let Ok(hello_frame) = frame::encode_text_frame(hello.as_bytes()) else {
            panic!("encode failed");
        };
        let mock = tokio_test::io::Builder::new()
            .write(response.as_bytes())
            .write(&hello_frame)
            .build();

        let conn = Connection::with_id(id, None, Box::new(mock));
        assert!(conn.complete_handshake(&response).await.is_ok());
        assert!(conn.is_open());

        conn.close().await;
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn write_after_close_fails_and_close_is_idempotent() {
        let conn = Connection::new(None, Box::new(tokio::io::sink()));
        assert!(conn.complete_handshake("").await.is_ok());

        conn.close().await;
        conn.close().await;
        conn.closed().await;

        let result = conn.send(&Packet::bare(OpCode::Pong)).await;
        assert!(matches!(result, Err(ServerError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn broken_stream_closes_connection() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let conn = Connection::new(None, Box::new(server));
        let result = conn.complete_handshake("HTTP/1.1 101 Switching Protocols\r\n\r\n").await;
        assert!(matches!(result, Err(ServerError::Io(_))));
        assert!(conn.is_closed());
    }
}

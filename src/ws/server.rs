//! TCP accept loop and per-connection worker.
//!
//! ```text
//! accept ─► Connection (write half) ─► ConnectionList + SessionStore
//!    │
//!    └─► worker task (read half)
//!          ├─ AwaitingHandshake: buffer until "\r\n\r\n", answer the upgrade
//!          └─ Open: decode frames ─► text ─► HubRegistry::handle_message
//!                                   close ─► echo close, stop
//! ```
//!
//! Every error is handled at the worker boundary: logged, the connection
//! closed and removed. Nothing propagates into the accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;

use super::connection::{Connection, ConnectionState};
use super::connection_list::ConnectionList;
use super::hub::{DispatchOutcome, HubRegistry};
use crate::domain::{Session, SessionStore};
use crate::error::ServerError;
use crate::protocol::frame::{self, Decoded, FrameOpcode};
use crate::protocol::handshake::{self, HandshakeError};

/// Socket read size.
const READ_CHUNK: usize = 4096;

/// Bytes needed before a stream can be recognised as an upgrade request.
const MIN_SNIFF_LEN: usize = 3;

/// Accepts clients and spawns one worker task per connection.
#[derive(Debug)]
pub struct ConnectionServer {
    listener: TcpListener,
    hubs: Arc<HubRegistry>,
    connections: ConnectionList,
    sessions: SessionStore,
}

impl ConnectionServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        hubs: Arc<HubRegistry>,
        connections: ConnectionList,
        sessions: SessionStore,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            hubs,
            connections,
            sessions,
        })
    }

    /// Returns the bound address (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` completes, then closes every
    /// live connection.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, hubs = self.hubs.len(), "websocket server listening");
        }

        loop {
            let accepted = tokio::select! {
                biased;
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    let (reader, writer) = stream.into_split();
                    let connection = Arc::new(Connection::new(Some(peer), Box::new(writer)));
                    self.spawn_worker(connection, reader).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }

        tracing::info!("websocket server shutting down");
        self.connections.close_all().await;
    }

    async fn spawn_worker<R>(&self, connection: Arc<Connection>, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let connection_id = connection.id();
        self.connections.insert(Arc::clone(&connection)).await;
        self.sessions
            .create(connection_id, Some(Session::new(connection_id)));
        tracing::info!(%connection_id, peer = ?connection.peer(), "connection accepted");

        let hubs = Arc::clone(&self.hubs);
        let connections = self.connections.clone();
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(&connection, reader, &hubs).await {
                tracing::info!(%connection_id, error = %e, "connection terminated");
            }
            connection.close().await;
            sessions.remove(&connection_id);
            connections.remove(connection_id).await;
            tracing::info!(%connection_id, "connection closed");
        });
    }
}

/// Drives one connection from the upgrade request until it closes.
///
/// Returns `Ok(())` when the client disconnects, sends a close frame or
/// the connection is closed from elsewhere.
///
/// # Errors
///
/// Returns protocol, handshake and I/O errors. They are fatal to this
/// connection only; the caller tears it down.
pub async fn serve_connection<R>(
    connection: &Arc<Connection>,
    mut reader: R,
    hubs: &HubRegistry,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut pending = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0_u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            () = connection.closed() => return Ok(()),
            read = reader.read(&mut chunk) => read?,
        };
        if read == 0 {
            tracing::debug!(connection_id = %connection.id(), "peer disconnected");
            return Ok(());
        }
        pending.extend_from_slice(chunk.get(..read).unwrap_or_default());

        match connection.state() {
            ConnectionState::AwaitingHandshake => upgrade(connection, &mut pending).await?,
            ConnectionState::Open => {}
            ConnectionState::Closed => return Ok(()),
        }
        if connection.is_open() && !process_frames(connection, &mut pending, hubs).await? {
            return Ok(());
        }
    }
}

/// Answers the upgrade request once its head is buffered. Bytes after the
/// head stay in `pending` as the first frames.
async fn upgrade(connection: &Arc<Connection>, pending: &mut Vec<u8>) -> Result<(), ServerError> {
    if pending.len() >= MIN_SNIFF_LEN && !handshake::is_upgrade_request(pending) {
        return Err(HandshakeError::NotUpgrade.into());
    }
    let Some(head_len) = handshake::request_head_len(pending) else {
        if pending.len() > handshake::MAX_REQUEST_LEN {
            return Err(HandshakeError::RequestTooLarge(pending.len()).into());
        }
        return Ok(());
    };

    let response = handshake::respond(pending.get(..head_len).unwrap_or_default())?;
    pending.drain(..head_len);
    connection.complete_handshake(&response).await
}

/// Decodes and handles every complete frame in `pending`. Returns `false`
/// once the connection should stop.
async fn process_frames(
    connection: &Arc<Connection>,
    pending: &mut Vec<u8>,
    hubs: &HubRegistry,
) -> Result<bool, ServerError> {
    loop {
        let Decoded::Frame { frame, consumed } = frame::decode_frame(pending)? else {
            return Ok(true);
        };
        pending.drain(..consumed);

        match frame.opcode {
            FrameOpcode::Text => {
                let Some(text) = frame.into_text()? else {
                    continue;
                };
                let outcome = hubs.handle_message(connection, &text).await;
                log_outcome(connection, &outcome);
                if outcome.is_fatal() || connection.is_closed() {
                    return Ok(false);
                }
            }
            FrameOpcode::Close => {
                tracing::debug!(connection_id = %connection.id(), "close frame received");
                connection.send_close().await;
                return Ok(false);
            }
            other => {
                tracing::trace!(connection_id = %connection.id(), opcode = other.as_u8(), "ignoring frame");
            }
        }
    }
}

fn log_outcome(connection: &Connection, outcome: &DispatchOutcome) {
    let connection_id = connection.id();
    match outcome {
        DispatchOutcome::Dispatched { hub } => {
            tracing::trace!(%connection_id, hub, "message handled");
        }
        DispatchOutcome::Failed { hub, error } => {
            tracing::warn!(%connection_id, hub, error = %error, "hub failed");
        }
        unroutable => {
            tracing::debug!(%connection_id, outcome = ?unroutable, "message dropped");
        }
    }
}

//! Server side of the WebSocket opening handshake (RFC 6455 Section 4).
//!
//! The client request is answered with a fixed `101 Switching Protocols`
//! response:
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Connection: Upgrade
//! Upgrade: websocket
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use base64::Engine;
use sha1::{Digest, Sha1};

/// RFC 6455 GUID appended to the client key.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound for the request head; larger requests are rejected.
pub const MAX_REQUEST_LEN: usize = 8 * 1024;

const KEY_HEADER: &str = "Sec-WebSocket-Key";
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Handshake failures. All of them close the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// The first bytes are not an HTTP `GET` request.
    #[error("expected an HTTP GET upgrade request")]
    NotUpgrade,

    /// The request carries no usable `Sec-WebSocket-Key`.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    /// The request head grew past [`MAX_REQUEST_LEN`].
    #[error("request head exceeds {MAX_REQUEST_LEN} bytes ({0} received)")]
    RequestTooLarge(usize),

    /// The request head is not UTF-8.
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
}

/// Computes `base64(SHA-1(key + GUID))`.
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Returns `true` if `buf` starts like an HTTP `GET` request.
#[must_use]
pub fn is_upgrade_request(buf: &[u8]) -> bool {
    buf.starts_with(b"GET")
}

/// Returns the length of the request head (including the blank line) once
/// it has been fully received.
#[must_use]
pub fn request_head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Extracts the `Sec-WebSocket-Key` value. Header names match
/// case-insensitively.
///
/// # Errors
///
/// Returns [`HandshakeError::MissingKey`] if the header is absent or empty.
pub fn client_key(request: &str) -> Result<&str, HandshakeError> {
    request
        .split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(KEY_HEADER))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or(HandshakeError::MissingKey)
}

/// Renders the upgrade response for an accept value.
#[must_use]
pub fn upgrade_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Validates an upgrade request head and renders the response to send.
///
/// # Errors
///
/// Returns [`HandshakeError::InvalidEncoding`], [`HandshakeError::NotUpgrade`]
/// or [`HandshakeError::MissingKey`].
pub fn respond(head: &[u8]) -> Result<String, HandshakeError> {
    if !is_upgrade_request(head) {
        return Err(HandshakeError::NotUpgrade);
    }
    let request = std::str::from_utf8(head).map_err(|_| HandshakeError::InvalidEncoding)?;
    let key = client_key(request)?;
    Ok(upgrade_response(&compute_accept_key(key)))
}

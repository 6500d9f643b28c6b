//! Wire protocol: WebSocket handshake and framing, plus the JSON
//! application envelope carried in text frames.

pub mod frame;
pub mod handshake;
pub mod packet;

pub use frame::{Decoded, Frame, FrameOpcode, ProtocolError};
pub use handshake::HandshakeError;
pub use packet::{DispatchType, OpCode, Packet};

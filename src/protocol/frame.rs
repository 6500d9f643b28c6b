//! WebSocket frame codec (RFC 6455 subset).
//!
//! Only what the gateway speaks is supported:
//! - single-frame messages (`FIN` must be set),
//! - 7-bit and 16-bit payload lengths (the 64-bit form is rejected),
//! - masked client frames in, unmasked text frames out.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16)              |
//! |N|V|V|V|       |S|             |   (if payload len == 126)     |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                Masking-key, if MASK set to 1                  |
//! +---------------------------------------------------------------+
//! |                          Payload Data                         |
//! +---------------------------------------------------------------+
//! ```

const FIN: u8 = 0b1000_0000;
const MASK: u8 = 0b1000_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const LENGTH_BITS: u8 = 0b0111_1111;

/// Largest length encoded in the 7-bit length field.
pub const MAX_SHORT_LEN: u8 = 125;

/// Length marker announcing a 16-bit extended length.
pub const EXTENDED_16: u8 = 126;

/// Length marker announcing a 64-bit extended length (unsupported).
pub const EXTENDED_64: u8 = 127;

/// Largest payload the codec accepts in either direction.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Framing errors. All of them are fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A frame arrived with `FIN` unset.
    #[error("fragmented frames are not supported")]
    FragmentedFrame,

    /// A frame announced a 64-bit extended length.
    #[error("frames with a 64-bit length are not supported")]
    UnsupportedLength,

    /// An outbound payload does not fit the 16-bit length field.
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_LEN} byte limit")]
    PayloadTooLarge(usize),

    /// A text frame did not contain valid UTF-8.
    #[error("text frame is not valid UTF-8")]
    InvalidUtf8,

    /// The buffer ended before the frame did.
    #[error("frame is truncated")]
    Truncated,
}

/// Frame type carried in the low nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameOpcode {
    /// Continuation of a fragmented message (`0x0`).
    Continuation,
    /// UTF-8 text (`0x1`).
    Text,
    /// Binary data (`0x2`).
    Binary,
    /// Connection close (`0x8`).
    Close,
    /// Ping (`0x9`).
    Ping,
    /// Pong (`0xA`).
    Pong,
    /// Any reserved opcode.
    Reserved(u8),
}

impl FrameOpcode {
    /// Maps the low nibble of a header byte to an opcode.
    #[must_use]
    pub const fn from_nibble(nibble: u8) -> Self {
        match nibble & OPCODE_BITS {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// Returns the wire value of the opcode.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(other) => other,
        }
    }
}

/// One decoded inbound frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub opcode: FrameOpcode,
    /// Whether the sender masked the payload.
    pub masked: bool,
    /// Payload bytes after unmasking.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Interprets the frame as a text message.
    ///
    /// Empty and unmasked frames carry no message and yield `None`; client
    /// frames must be masked.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidUtf8`] if the payload is not UTF-8.
    pub fn into_text(self) -> Result<Option<String>, ProtocolError> {
        if self.payload.is_empty() || !self.masked {
            return Ok(None);
        }
        String::from_utf8(self.payload)
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// Result of decoding from an accumulated read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// More bytes are needed before a frame can be decoded.
    Incomplete,
    /// A full frame was decoded from the first `consumed` bytes.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Number of buffer bytes the frame occupied.
        consumed: usize,
    },
}

/// Decodes the frame at the start of `buf`.
///
/// # Errors
///
/// Returns [`ProtocolError::FragmentedFrame`] when `FIN` is unset and
/// [`ProtocolError::UnsupportedLength`] for 64-bit lengths.
pub fn decode_frame(buf: &[u8]) -> Result<Decoded, ProtocolError> {
    let [first, second, rest @ ..] = buf else {
        return Ok(Decoded::Incomplete);
    };

    if first & FIN == 0 {
        return Err(ProtocolError::FragmentedFrame);
    }
    let opcode = FrameOpcode::from_nibble(*first);
    let masked = second & MASK != 0;

    let (len, rest) = match second & LENGTH_BITS {
        EXTENDED_16 => {
            let [hi, lo, rest @ ..] = rest else {
                return Ok(Decoded::Incomplete);
            };
            (usize::from(u16::from_be_bytes([*hi, *lo])), rest)
        }
        EXTENDED_64 => return Err(ProtocolError::UnsupportedLength),
        short => (usize::from(short), rest),
    };

    let (mask, rest) = if masked {
        let [a, b, c, d, rest @ ..] = rest else {
            return Ok(Decoded::Incomplete);
        };
        (Some([*a, *b, *c, *d]), rest)
    } else {
        (None, rest)
    };

    let Some(data) = rest.get(..len) else {
        return Ok(Decoded::Incomplete);
    };
    let consumed = buf.len() - rest.len() + len;

    let mut payload = data.to_vec();
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Decoded::Frame {
        frame: Frame {
            opcode,
            masked,
            payload,
        },
        consumed,
    })
}

/// Decodes one complete frame and returns its text, if any.
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] if `buf` does not hold a whole
/// frame, plus every error of [`decode_frame`] and [`Frame::into_text`].
pub fn process_incoming(buf: &[u8]) -> Result<Option<String>, ProtocolError> {
    match decode_frame(buf)? {
        Decoded::Incomplete => Err(ProtocolError::Truncated),
        Decoded::Frame { frame, .. } => frame.into_text(),
    }
}

/// XORs `payload` in place with the 4-byte masking key.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (byte, key) in payload.iter_mut().zip(mask.iter().cycle()) {
        *byte ^= key;
    }
}

/// Builds an unmasked, final text frame around `payload`.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] above [`MAX_PAYLOAD_LEN`].
pub fn encode_text_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 4);
    frame.push(FIN | FrameOpcode::Text.as_u8());

    if let Ok(short) = u8::try_from(len)
        && short <= MAX_SHORT_LEN
    {
        frame.push(short);
    } else if let Ok(medium) = u16::try_from(len) {
        frame.push(EXTENDED_16);
        frame.extend_from_slice(&medium.to_be_bytes());
    } else {
        return Err(ProtocolError::PayloadTooLarge(len));
    }

    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Builds an empty close frame.
#[must_use]
pub fn encode_close_frame() -> Vec<u8> {
    vec![FIN | FrameOpcode::Close.as_u8(), 0]
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn masked(first: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![first];
        match payload.len() {
            len @ 0..=125 => frame.push(MASK | len as u8),
            len => {
                frame.push(MASK | EXTENDED_16);
                frame.extend_from_slice(&(len as u16).to_be_bytes());
            }
        }
        frame.extend_from_slice(&KEY);
        let mut body = payload.to_vec();
        apply_mask(&mut body, KEY);
        frame.extend_from_slice(&body);
        frame
    }

    #[test]
    fn decodes_masked_text() {
        let frame = masked(0x81, b"ping");
        assert_eq!(process_incoming(&frame), Ok(Some("ping".to_string())));
    }

    #[test]
    fn rejects_fragmented_frame() {
        let frame = masked(0x01, b"ping");
        assert_eq!(process_incoming(&frame), Err(ProtocolError::FragmentedFrame));
    }

    #[test]
    fn rejects_64_bit_length() {
        let frame = [0x81, MASK | EXTENDED_64, 0, 0, 0, 0, 0, 1, 0, 0];
        assert_eq!(decode_frame(&frame), Err(ProtocolError::UnsupportedLength));
    }

    #[test]
    fn empty_and_unmasked_frames_carry_no_message() {
        assert_eq!(process_incoming(&masked(0x81, b"")), Ok(None));
        assert_eq!(process_incoming(&[0x81, 0x04, b'p', b'i', b'n', b'g']), Ok(None));
    }

    #[test]
    fn decodes_16_bit_length() {
        let text = "x".repeat(300);
        let frame = masked(0x81, text.as_bytes());
        assert_eq!(frame[1] & LENGTH_BITS, EXTENDED_16);
        assert_eq!(process_incoming(&frame), Ok(Some(text)));
    }

    #[test]
    fn reports_incomplete_and_consumed_bytes() {
        let frame = masked(0x81, b"hello");
        for cut in 0..frame.len() {
            assert_eq!(decode_frame(&frame[..cut]), Ok(Decoded::Incomplete));
        }

        let mut two = frame.clone();
        two.extend_from_slice(&masked(0x88, b""));
        let Ok(Decoded::Frame { frame: first, consumed }) = decode_frame(&two) else {
            panic!("expected a frame");
        };
        assert_eq!(consumed, frame.len());
        assert_eq!(first.opcode, FrameOpcode::Text);
        let Ok(Decoded::Frame { frame: second, .. }) = decode_frame(&two[consumed..]) else {
            panic!("expected a second frame");
        };
        assert_eq!(second.opcode, FrameOpcode::Close);
    }

    #[test]
    fn rejects_invalid_utf8() {
        let frame = masked(0x81, &[0xff, 0xfe]);
        assert_eq!(process_incoming(&frame), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn truncated_buffer_is_an_error_for_single_frame_decode() {
        let frame = masked(0x81, b"ping");
        assert_eq!(
            process_incoming(&frame[..frame.len() - 1]),
            Err(ProtocolError::Truncated)
        );
    }

    #[test]
    fn short_payload_uses_one_length_byte() {
        let Ok(frame) = encode_text_frame(&[b'a'; 10]) else {
            panic!("encode failed");
        };
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 10);
        assert_eq!(frame.len(), 12);
    }

    #[test]
    fn medium_payload_uses_extended_length() {
        let Ok(frame) = encode_text_frame(&[b'a'; 130]) else {
            panic!("encode failed");
        };
        assert_eq!(frame[1], EXTENDED_16);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 130);
        assert_eq!(frame.len(), 4 + 130);
    }

    #[test]
    fn boundary_lengths() {
        let Ok(at_limit) = encode_text_frame(&[0; 125]) else {
            panic!("encode failed");
        };
        assert_eq!(at_limit[1], 125);

        let Ok(max) = encode_text_frame(&vec![0; MAX_PAYLOAD_LEN]) else {
            panic!("encode failed");
        };
        assert_eq!(max[1], EXTENDED_16);

        let too_large = encode_text_frame(&vec![0; MAX_PAYLOAD_LEN + 1]);
        assert_eq!(too_large, Err(ProtocolError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1)));
    }

    #[test]
    fn outbound_frames_are_unmasked() {
        let Ok(frame) = encode_text_frame(b"{}") else {
            panic!("encode failed");
        };
        assert_eq!(frame[1] & MASK, 0);
        assert_eq!(&frame[2..], b"{}");
    }

    #[test]
    fn opcode_nibbles() {
        assert_eq!(FrameOpcode::from_nibble(0x81), FrameOpcode::Text);
        assert_eq!(FrameOpcode::from_nibble(0x88), FrameOpcode::Close);
        assert_eq!(FrameOpcode::from_nibble(0x03), FrameOpcode::Reserved(3));
        assert_eq!(FrameOpcode::Pong.as_u8(), 0xA);
    }
}

//! WebSocket frame model.
//!
//! A [`Frame`] is one wire-level unit: header bits, an optional masking key
//! and the (already unmasked) payload. Encoding and decoding live in
//! [`crate::codec`]; this module only describes the values.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use std::fmt;

use bytes::Bytes;

use crate::{codec::ProtocolError, mask::MASK_KEY_LEN};

pub mod close;

pub use close::{CloseCode, CloseFrame};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Four bit frame opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continues a fragmented data message.
    Continuation = 0x0,
    /// UTF-8 text data.
    Text = 0x1,
    /// Binary data.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    #[must_use]
    pub const fn is_control(self) -> bool { matches!(self, Self::Close | Self::Ping | Self::Pong) }

    /// Returns `true` for `Continuation`, `Text` and `Binary`.
    #[must_use]
    pub const fn is_data(self) -> bool { !self.is_control() }

    /// The raw four bit value.
    #[must_use]
    pub const fn as_u8(self) -> u8 { self as u8 }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolError::ReservedOpcode(other)),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

/// Which end of the connection a codec speaks for.
///
/// Clients mask every frame they send; servers never do. Each side rejects
/// inbound frames that break the rule for its peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Role {
    /// Accepts masked frames, emits unmasked frames.
    #[default]
    Server,
    /// Accepts unmasked frames, emits masked frames.
    Client,
}

/// A single WebSocket frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present when the mask bit is set.
    pub mask_key: Option<[u8; MASK_KEY_LEN]>,
    /// Payload bytes, never masked.
    pub payload: Bytes,
}

impl Frame {
    /// Build an unmasked frame.
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Final text frame.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self { Self::new(OpCode::Text, payload, true) }

    /// Final binary frame.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self { Self::new(OpCode::Binary, payload, true) }

    /// Continuation fragment.
    #[must_use]
    pub fn continuation(payload: impl Into<Bytes>, fin: bool) -> Self {
        Self::new(OpCode::Continuation, payload, fin)
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self { Self::new(OpCode::Ping, payload, true) }

    /// Pong frame.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self { Self::new(OpCode::Pong, payload, true) }

    /// Close frame carrying `close` as its payload, or an empty payload.
    #[must_use]
    pub fn close(close: Option<&CloseFrame>) -> Self {
        let payload = close.map(CloseFrame::to_payload).unwrap_or_default();
        Self::new(OpCode::Close, payload, true)
    }

    /// Attach a masking key, as a client would before sending.
    #[must_use]
    pub fn with_mask(mut self, key: [u8; MASK_KEY_LEN]) -> Self {
        self.mask_key = Some(key);
        self
    }

    /// Whether the mask bit is set.
    #[must_use]
    pub const fn is_masked(&self) -> bool { self.mask_key.is_some() }
}

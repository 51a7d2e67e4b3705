//! Application level WebSocket messages.
//!
//! A [`Message`] is what handlers see after the connection has reassembled
//! any fragments: either UTF-8 text or raw bytes.

use bytes::Bytes;

use crate::frame::OpCode;

/// A complete data message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Text message. Invalid UTF-8 from the peer is replaced, not rejected.
    Text(String),
    /// Binary message.
    Binary(Bytes),
}

impl Message {
    /// Build a message from a data opcode and its reassembled payload.
    ///
    /// Returns `None` for control and continuation opcodes.
    #[must_use]
    pub fn from_parts(opcode: OpCode, payload: Bytes) -> Option<Self> {
        match opcode {
            OpCode::Text => Some(Self::Text(
                String::from_utf8(payload.into())
                    .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
            )),
            OpCode::Binary => Some(Self::Binary(payload)),
            _ => None,
        }
    }

    /// Whether this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool { matches!(self, Self::Text(_)) }

    /// Borrow the payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.as_bytes().len() }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.as_bytes().is_empty() }

    /// Opcode used for the first frame of this message.
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Self::Text(_) => OpCode::Text,
            Self::Binary(_) => OpCode::Binary,
        }
    }

    /// Consume the message, returning the payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self { Self::Text(value) }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}

impl From<Bytes> for Message {
    fn from(value: Bytes) -> Self { Self::Binary(value) }
}

impl From<Vec<u8>> for Message {
    fn from(value: Vec<u8>) -> Self { Self::Binary(Bytes::from(value)) }
}

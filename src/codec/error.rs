//! Error types for the frame codec.
//!
//! [`ProtocolError`] covers every way an inbound byte stream can violate the
//! framing rules. All of them are fatal to the connection; each maps to the
//! close status sent to the peer through [`ProtocolError::close_code`].
//! [`CodecError`] wraps protocol errors together with the encode-side role
//! checks and transport failures so the codec can plug into
//! `tokio_util::codec`.

use std::io;

use thiserror::Error;

use crate::frame::close::{CloseCode, MESSAGE_TOO_BIG, PROTOCOL_ERROR};

/// Framing and sequencing violations detected on inbound frames.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Opcode 3-7 or 11-15.
    #[error("reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// RSV1, RSV2 or RSV3 set without a negotiated extension.
    #[error("reserved bits set: {0:#05b}")]
    ReservedBits(u8),

    /// A client sent a frame without the mask bit.
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// A server sent a frame with the mask bit.
    #[error("server frame must not be masked")]
    UnexpectedMask,

    /// Declared payload length exceeds the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    FrameTooLarge {
        /// Length announced by the header.
        size: u64,
        /// Configured maximum frame size.
        max: usize,
    },

    /// 64-bit length with the most significant bit set.
    #[error("invalid payload length encoding: {0}")]
    InvalidLength(u64),

    /// Control frame with FIN cleared.
    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload above 125 bytes.
    #[error("control frame payload too large: {0} bytes")]
    ControlFrameTooLarge(usize),

    /// Continuation frame with no fragmented message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// New text or binary frame while a fragmented message is incomplete.
    #[error("data frame received while a fragmented message is in progress")]
    UnexpectedDataFrame,

    /// Reassembled message grew beyond the configured maximum.
    #[error("message exceeds max size: {size} > {max}")]
    MessageTooLarge {
        /// Size the message would have reached.
        size: usize,
        /// Configured maximum message size.
        max: usize,
    },
}

impl ProtocolError {
    /// Close status to report to the peer.
    ///
    /// ```
    /// use wsgate::codec::ProtocolError;
    ///
    /// assert_eq!(ProtocolError::ReservedOpcode(3).close_code(), 1002);
    /// assert_eq!(
    ///     ProtocolError::MessageTooLarge { size: 10, max: 4 }.close_code(),
    ///     1009
    /// );
    /// ```
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::FrameTooLarge { .. } | Self::MessageTooLarge { .. } => MESSAGE_TOO_BIG,
            _ => PROTOCOL_ERROR,
        }
    }

    /// Short label used for logging and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReservedOpcode(_) => "reserved_opcode",
            Self::ReservedBits(_) => "reserved_bits",
            Self::UnmaskedFrame | Self::UnexpectedMask => "masking",
            Self::FrameTooLarge { .. } | Self::InvalidLength(_) => "length",
            Self::FragmentedControlFrame | Self::ControlFrameTooLarge(_) => "control_frame",
            Self::UnexpectedContinuation | Self::UnexpectedDataFrame => "fragmentation",
            Self::MessageTooLarge { .. } => "message_size",
        }
    }
}

/// Top-level error raised by [`WebSocketCodec`](super::WebSocketCodec).
#[derive(Debug, Error)]
pub enum CodecError {
    /// Inbound frame violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A server-role encoder was handed a masked frame.
    #[error("server frames must not be masked")]
    MaskedServerFrame,

    /// A client-role encoder was handed an unmasked frame.
    #[error("client frames must be masked")]
    UnmaskedClientFrame,

    /// Outbound frame exceeds the configured maximum.
    #[error("outbound frame exceeds max length: {size} > {max}")]
    OversizedOutbound {
        /// Payload length of the rejected frame.
        size: usize,
        /// Configured maximum frame size.
        max: usize,
    },

    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e,
            CodecError::Protocol(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}

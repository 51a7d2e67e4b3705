//! Events produced by [`Connection::feed`](super::Connection::feed).

use bytes::Bytes;

use crate::{codec::ProtocolError, frame::CloseFrame, message::Message};

/// Something the application should hear about, in frame arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A complete data message.
    Message(Message),
    /// The peer pinged; the pong is already queued.
    Ping(Bytes),
    /// The peer answered a ping.
    Pong(Bytes),
    /// The peer started or acknowledged the close handshake. Carries the raw
    /// close payload, which may be empty.
    Close(Bytes),
    /// The peer broke the protocol; a close frame is already queued.
    Error(ProtocolError),
}

impl ConnectionEvent {
    /// Parsed status and reason for a [`ConnectionEvent::Close`].
    #[must_use]
    pub fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            Self::Close(payload) => CloseFrame::parse(payload),
            _ => None,
        }
    }
}

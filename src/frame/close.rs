//! Close frame payloads and status codes.

use bytes::{BufMut, Bytes, BytesMut};

/// Close status code (RFC 6455 section 7.4.1).
pub type CloseCode = u16;

/// Normal closure.
pub const NORMAL: CloseCode = 1000;
/// Endpoint is going away (server shutdown, page navigation).
pub const GOING_AWAY: CloseCode = 1001;
/// Protocol error.
pub const PROTOCOL_ERROR: CloseCode = 1002;
/// Data type the endpoint cannot accept.
pub const UNSUPPORTED_DATA: CloseCode = 1003;
/// Message too big to process.
pub const MESSAGE_TOO_BIG: CloseCode = 1009;
/// Unexpected condition on the server.
pub const INTERNAL_ERROR: CloseCode = 1011;

/// Whether `code` may appear in a close frame on the wire.
///
/// 1004, 1005, 1006 and 1015 are reserved for local reporting, and codes
/// outside 1000-4999 are never valid.
///
/// ```
/// use wsgate::frame::close;
///
/// assert!(close::is_sendable(close::NORMAL));
/// assert!(!close::is_sendable(1005));
/// ```
#[must_use]
pub const fn is_sendable(code: CloseCode) -> bool {
    matches!(code, 1000..=4999) && !matches!(code, 1004 | 1005 | 1006 | 1015)
}

/// Status code and reason carried by a close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code.
    pub code: CloseCode,
    /// Human readable reason, possibly empty.
    pub reason: String,
}

impl CloseFrame {
    /// Build a close payload.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse a close payload: two big-endian status bytes then UTF-8 text.
    ///
    /// Returns `None` for payloads shorter than two bytes. Invalid UTF-8 in
    /// the reason is replaced rather than rejected.
    ///
    /// ```
    /// use wsgate::frame::CloseFrame;
    ///
    /// let close = CloseFrame::parse(&[0x03, 0xe8, b'b', b'y', b'e']).expect("status present");
    /// assert_eq!(close.code, 1000);
    /// assert_eq!(close.reason, "bye");
    /// assert!(CloseFrame::parse(&[]).is_none());
    /// ```
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let (status, reason) = payload.split_first_chunk::<2>()?;
        Some(Self {
            code: u16::from_be_bytes(*status),
            reason: String::from_utf8_lossy(reason).into_owned(),
        })
    }

    /// Encode into a frame payload.
    #[must_use]
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.reason.len());
        buf.put_u16(self.code);
        buf.put_slice(self.reason.as_bytes());
        buf.freeze()
    }
}

//! Per-connection accumulator for fragmented data messages.
//!
//! A fragmented message starts with a `Text` or `Binary` frame whose `fin`
//! bit is clear, continues with `Continuation` frames and ends with the first
//! continuation that sets `fin`. Only one message may be in flight; control
//! frames may arrive between fragments and never touch this buffer.

use bytes::BytesMut;

use crate::{codec::ProtocolError, frame::OpCode, message::Message};

#[derive(Debug)]
struct PartialMessage {
    opcode: OpCode,
    buffer: BytesMut,
}

/// Buffer holding the message currently being reassembled.
#[derive(Debug)]
pub struct FragmentBuffer {
    max_message_size: usize,
    partial: Option<PartialMessage>,
}

impl FragmentBuffer {
    /// Create a buffer capping reassembled messages at `max_message_size`.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    /// Largest reassembled payload accepted.
    #[must_use]
    pub const fn max_message_size(&self) -> usize { self.max_message_size }

    /// Whether a fragmented message is in progress.
    #[must_use]
    pub const fn in_progress(&self) -> bool { self.partial.is_some() }

    /// Bytes buffered so far.
    #[must_use]
    pub fn buffered(&self) -> usize { self.partial.as_ref().map_or(0, |p| p.buffer.len()) }

    /// Start a new message from a `Text` or `Binary` frame with `fin` clear.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedDataFrame`] if a message is already
    /// in progress and [`ProtocolError::MessageTooLarge`] if the first
    /// fragment exceeds the cap.
    pub fn start(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.partial.is_some() {
            return Err(ProtocolError::UnexpectedDataFrame);
        }
        self.check_size(payload.len())?;
        self.partial = Some(PartialMessage {
            opcode,
            buffer: BytesMut::from(payload),
        });
        Ok(())
    }

    /// Append a continuation fragment.
    ///
    /// Returns `Ok(Some(_))` when `fin` completes the message and `Ok(None)`
    /// while more fragments are required.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedContinuation`] when no message is in
    /// progress and [`ProtocolError::MessageTooLarge`] when the reassembled
    /// payload would exceed the cap.
    pub fn push(&mut self, payload: &[u8], fin: bool) -> Result<Option<Message>, ProtocolError> {
        let Some(partial) = self.partial.as_mut() else {
            return Err(ProtocolError::UnexpectedContinuation);
        };
        let size = partial.buffer.len().saturating_add(payload.len());
        if size > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        partial.buffer.extend_from_slice(payload);
        if !fin {
            return Ok(None);
        }
        Ok(self
            .partial
            .take()
            .and_then(|p| Message::from_parts(p.opcode, p.buffer.freeze())))
    }

    /// Check that an unfragmented message fits under the cap.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTooLarge`] when `len` exceeds the cap.
    pub fn check_size(&self, len: usize) -> Result<(), ProtocolError> {
        if len > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    /// Drop any partial message.
    pub fn clear(&mut self) { self.partial = None; }
}

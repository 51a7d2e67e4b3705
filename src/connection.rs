//! Sans-IO WebSocket connection state machine.
//!
//! A [`Connection`] never touches a socket. The driver feeds it raw bytes
//! with [`Connection::feed`], hands the returned events to the application,
//! and writes whatever [`Connection::take_outbound`] yields. Replies the
//! protocol requires (pongs, close acknowledgements, error closes) are queued
//! automatically.
//!
//! ```
//! use wsgate::{
//!     config::ConnectionConfig,
//!     connection::{Connection, ConnectionEvent},
//!     message::Message,
//!     session::ConnectionId,
//! };
//!
//! let mut conn = Connection::new(ConnectionId::new(1), &ConnectionConfig::default());
//! conn.handshake_written();
//!
//! // Masked "Hello" from RFC 6455 section 5.7.
//! let events = conn.feed(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]);
//! assert_eq!(events, vec![ConnectionEvent::Message(Message::Text("Hello".into()))]);
//! ```

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, trace, warn};

mod event;
mod state;

pub use event::ConnectionEvent;
pub use state::{ConnectionState, SharedState};

use crate::{
    codec::{DecodeOptions, Decoded, ProtocolError, decode_frame, encode_frame},
    config::ConnectionConfig,
    fragment::FragmentBuffer,
    frame::{CloseCode, CloseFrame, Frame, MAX_CONTROL_PAYLOAD, OpCode, Role, close},
    handshake::{HandshakeError, HandshakeResponse, UpgradeRequest, negotiate},
    message::Message,
    metrics::{self, Direction},
    session::ConnectionId,
};

/// Operations refused because of the connection's state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Sending requires the `Open` state.
    #[error("connection is {state}, not open")]
    NotOpen {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// Control frame payloads are limited to 125 bytes.
    #[error("control payload of {0} bytes exceeds 125")]
    ControlPayloadTooLarge(usize),
}

/// One peer's protocol state.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    shared: SharedState,
    options: DecodeOptions,
    fragments: FragmentBuffer,
    pending: BytesMut,
    outbound: VecDeque<Bytes>,
    released: bool,
}

impl Connection {
    /// Create a connection waiting for its handshake response to be written.
    #[must_use]
    pub fn new(id: ConnectionId, config: &ConnectionConfig) -> Self {
        Self {
            id,
            state: ConnectionState::Handshaking,
            shared: SharedState::default(),
            options: DecodeOptions {
                role: Role::Server,
                max_frame_size: config.max_frame_size(),
            },
            fragments: FragmentBuffer::new(config.max_message_size()),
            pending: BytesMut::new(),
            outbound: VecDeque::new(),
            released: false,
        }
    }

    /// Negotiate an upgrade request and create the connection.
    ///
    /// Nothing is created when negotiation fails.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeError`] produced by
    /// [`negotiate`](crate::handshake::negotiate).
    pub fn accept(
        id: ConnectionId,
        request: &UpgradeRequest,
        config: &ConnectionConfig,
    ) -> Result<(Self, HandshakeResponse), HandshakeError> {
        let response = negotiate(request)?;
        Ok((Self::new(id, config), response))
    }

    /// Identifier assigned by the session registry.
    #[must_use]
    pub const fn id(&self) -> ConnectionId { self.id }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState { self.state }

    /// Handle for observing the state from other tasks.
    #[must_use]
    pub fn shared_state(&self) -> SharedState { self.shared.clone() }

    /// Whether data may be sent.
    #[must_use]
    pub fn is_open(&self) -> bool { self.state == ConnectionState::Open }

    fn transition(&mut self, next: ConnectionState) {
        if next != self.state {
            debug!(id = %self.id, from = %self.state, to = %next, "connection state changed");
            self.state = next;
            self.shared.store(next);
        }
    }

    /// The `101` response reached the transport.
    pub fn handshake_written(&mut self) {
        if self.state == ConnectionState::Handshaking {
            self.transition(ConnectionState::Open);
        }
    }

    /// The `101` response could not be written.
    pub fn handshake_failed(&mut self) { self.transition(ConnectionState::Closed); }

    /// Process inbound bytes.
    ///
    /// Complete frames are decoded in order until the buffer runs dry, a
    /// close frame arrives or the peer breaks the protocol. Bytes arriving
    /// outside the `Open` state are discarded.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        if self.state != ConnectionState::Open {
            trace!(id = %self.id, state = %self.state, len = bytes.len(), "ignoring inbound bytes");
            return events;
        }
        self.pending.extend_from_slice(bytes);

        while self.state == ConnectionState::Open {
            let frame = match decode_frame(&self.pending, &self.options) {
                Ok(Decoded::Frame { frame, consumed }) => {
                    self.pending.advance(consumed);
                    frame
                }
                Ok(Decoded::NeedMoreData) => break,
                Err(err) => {
                    events.push(self.fail(err));
                    break;
                }
            };
            metrics::inc_frames(Direction::Inbound);
            match self.handle_frame(frame) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => events.push(self.fail(err)),
            }
        }
        events
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<Option<ConnectionEvent>, ProtocolError> {
        let Frame {
            fin,
            opcode,
            payload,
            ..
        } = frame;
        match opcode {
            OpCode::Text | OpCode::Binary if fin => {
                if self.fragments.in_progress() {
                    return Err(ProtocolError::UnexpectedDataFrame);
                }
                self.fragments.check_size(payload.len())?;
                Ok(Message::from_parts(opcode, payload).map(ConnectionEvent::Message))
            }
            OpCode::Text | OpCode::Binary => {
                self.fragments.start(opcode, &payload)?;
                Ok(None)
            }
            OpCode::Continuation => Ok(self
                .fragments
                .push(&payload, fin)?
                .map(ConnectionEvent::Message)),
            OpCode::Ping => {
                self.enqueue(&Frame::pong(payload.clone()));
                Ok(Some(ConnectionEvent::Ping(payload)))
            }
            OpCode::Pong => Ok(Some(ConnectionEvent::Pong(payload))),
            OpCode::Close => {
                // Reserved or invalid peer codes are answered with a normal close.
                let ack = CloseFrame::parse(&payload).map(|peer| {
                    let code = if close::is_sendable(peer.code) { peer.code } else { close::NORMAL };
                    CloseFrame::new(code, "")
                });
                self.fragments.clear();
                self.enqueue(&Frame::close(ack.as_ref()));
                self.transition(ConnectionState::Closing);
                Ok(Some(ConnectionEvent::Close(payload)))
            }
        }
    }

    fn fail(&mut self, err: ProtocolError) -> ConnectionEvent {
        warn!(id = %self.id, error = %err, "protocol violation, closing connection");
        metrics::inc_errors(err.kind());
        self.fragments.clear();
        self.pending.clear();
        let close = CloseFrame::new(err.close_code(), truncate_reason(&err.to_string()));
        self.enqueue(&Frame::close(Some(&close)));
        self.transition(ConnectionState::Closing);
        ConnectionEvent::Error(err)
    }

    fn enqueue(&mut self, frame: &Frame) {
        let mut buf = BytesMut::with_capacity(frame.payload.len() + 10);
        encode_frame(frame, &mut buf);
        self.outbound.push_back(buf.freeze());
        metrics::inc_frames(Direction::Outbound);
    }

    /// Next encoded frame awaiting a transport write.
    pub fn take_outbound(&mut self) -> Option<Bytes> { self.outbound.pop_front() }

    /// Whether encoded frames are waiting.
    #[must_use]
    pub fn has_outbound(&self) -> bool { !self.outbound.is_empty() }

    /// The driver wrote everything [`take_outbound`](Self::take_outbound)
    /// returned.
    ///
    /// A `Closing` connection with nothing left to send becomes `Closed`.
    /// Returns `true` when the connection is `Closed`.
    pub fn flushed(&mut self) -> bool {
        if self.state == ConnectionState::Closing && self.outbound.is_empty() {
            self.transition(ConnectionState::Closed);
        }
        self.state == ConnectionState::Closed
    }

    /// The transport went away or the driver is done with it.
    ///
    /// Moves to `Closed` from any state and drops queued output. Returns
    /// `true` on the first call only, so the caller can release the session
    /// exactly once.
    pub fn transport_closed(&mut self) -> bool {
        self.transition(ConnectionState::Closed);
        self.outbound.clear();
        self.pending.clear();
        self.fragments.clear();
        !std::mem::replace(&mut self.released, true)
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.state == ConnectionState::Open {
            Ok(())
        } else {
            Err(StateError::NotOpen { state: self.state })
        }
    }

    /// Queue a single unfragmented frame.
    ///
    /// Sending [`OpCode::Close`] starts the close handshake like
    /// [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotOpen`] outside the `Open` state and
    /// [`StateError::ControlPayloadTooLarge`] for control payloads above 125
    /// bytes.
    pub fn send(&mut self, opcode: OpCode, payload: impl Into<Bytes>) -> Result<(), StateError> {
        self.ensure_open()?;
        let payload = payload.into();
        if opcode.is_control() && payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(StateError::ControlPayloadTooLarge(payload.len()));
        }
        self.enqueue(&Frame::new(opcode, payload, true));
        if opcode == OpCode::Close {
            self.transition(ConnectionState::Closing);
        }
        Ok(())
    }

    /// Queue a data message.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotOpen`] outside the `Open` state.
    pub fn send_message(&mut self, message: Message) -> Result<(), StateError> {
        self.send(message.opcode(), message.into_payload())
    }

    /// Queue a ping.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn ping(&mut self, payload: impl Into<Bytes>) -> Result<(), StateError> {
        self.send(OpCode::Ping, payload)
    }

    /// Start the close handshake from this side.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotOpen`] outside the `Open` state.
    pub fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), StateError> {
        self.ensure_open()?;
        let close = CloseFrame::new(code, truncate_reason(reason));
        self.enqueue(&Frame::close(Some(&close)));
        self.transition(ConnectionState::Closing);
        Ok(())
    }
}

/// Cut `reason` so a close payload stays within the control frame limit.
fn truncate_reason(reason: &str) -> &str {
    const MAX_REASON: usize = MAX_CONTROL_PAYLOAD - 2;
    if reason.len() <= MAX_REASON {
        return reason;
    }
    let mut end = MAX_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

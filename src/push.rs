//! Outbound queues used for pushing messages to a connection.
//!
//! Every open connection owns a bounded [`SessionQueue`] drained by its
//! driver task. Other tasks reach it through a cloneable [`SessionHandle`],
//! which never blocks: a full queue or a finished driver is reported to the
//! caller instead. Queued items are delivered in FIFO order.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    connection::{ConnectionState, SharedState},
    frame::CloseCode,
    message::Message,
    session::ConnectionId,
};

/// Work item delivered to a connection's driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Data message to send.
    Message(Message),
    /// Ping to send.
    Ping(Bytes),
    /// Start the close handshake.
    Close {
        /// Status code for the close frame.
        code: CloseCode,
        /// Reason text, truncated to fit a control frame.
        reason: String,
    },
}

/// Errors that can occur when pushing to a session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PushError {
    /// The connection is not accepting data.
    #[error("connection is {state}, not open")]
    NotOpen {
        /// State observed when the push was attempted.
        state: ConnectionState,
    },

    /// The outbound queue is at capacity.
    #[error("outbound queue full")]
    Full,

    /// The connection's driver has gone away.
    #[error("outbound queue closed")]
    Closed,

    /// No session is registered under the identifier.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

struct SessionHandleInner {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    state: SharedState,
}

/// Cloneable handle used by other tasks to push to one connection.
#[derive(Clone)]
pub struct SessionHandle(Arc<SessionHandleInner>);

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.0.id)
            .field("state", &self.0.state.load())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Identifier of the connection this handle reaches.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.0.id }

    /// Current state of the connection.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.0.state.load() }

    /// Whether the connection is open and its driver is alive.
    #[must_use]
    pub fn is_open(&self) -> bool { self.state() == ConnectionState::Open && !self.0.tx.is_closed() }

    /// Whether the driver has dropped its queue.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.0.tx.is_closed() }

    fn try_push(&self, item: Outbound) -> Result<(), PushError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(PushError::NotOpen { state });
        }
        match self.0.tx.try_send(item) {
            Ok(()) => {
                debug!(id = %self.0.id, "outbound item queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(id = %self.0.id, "outbound queue full");
                Err(PushError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PushError::Closed),
        }
    }

    /// Queue a data message.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::NotOpen`] unless the connection is open,
    /// [`PushError::Full`] when the queue is at capacity and
    /// [`PushError::Closed`] when the driver has gone away.
    pub fn send(&self, message: impl Into<Message>) -> Result<(), PushError> {
        self.try_push(Outbound::Message(message.into()))
    }

    /// Queue a ping.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn ping(&self, payload: impl Into<Bytes>) -> Result<(), PushError> {
        self.try_push(Outbound::Ping(payload.into()))
    }

    /// Ask the driver to close the connection.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> Result<(), PushError> {
        self.try_push(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }
}

/// Receiving end of a connection's outbound queue, owned by its driver.
#[derive(Debug)]
pub struct SessionQueue {
    rx: mpsc::Receiver<Outbound>,
}

impl SessionQueue {
    /// Create a queue holding up to `capacity` items and the handle feeding
    /// it. `state` is the connection's shared state cell.
    ///
    /// ```
    /// use wsgate::{
    ///     config::ConnectionConfig,
    ///     connection::Connection,
    ///     push::{Outbound, SessionQueue},
    ///     session::ConnectionId,
    /// };
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let id = ConnectionId::new(1);
    /// let mut conn = Connection::new(id, &ConnectionConfig::default());
    /// conn.handshake_written();
    ///
    /// let (mut queue, handle) = SessionQueue::bounded(id, conn.shared_state(), 4);
    /// handle.send("hi").expect("connection is open");
    /// assert!(matches!(queue.recv().await, Some(Outbound::Message(_))));
    /// # }
    /// ```
    #[must_use]
    pub fn bounded(id: ConnectionId, state: SharedState, capacity: usize) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let inner = SessionHandleInner { id, tx, state };
        (Self { rx }, SessionHandle(Arc::new(inner)))
    }

    /// Receive the next item; `None` once every handle is gone.
    pub async fn recv(&mut self) -> Option<Outbound> { self.rx.recv().await }

    /// Stop accepting new items. Already queued items can still be received.
    pub fn close(&mut self) { self.rx.close(); }
}

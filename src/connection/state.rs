//! Connection lifecycle states.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

/// Lifecycle of a single WebSocket connection.
///
/// Transitions only move forward:
/// `Handshaking -> Open -> Closing -> Closed`, with `Closed` reachable from
/// every state when the transport goes away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Waiting for the upgrade response to be written.
    #[default]
    Handshaking = 0,
    /// Data frames may flow in both directions.
    Open = 1,
    /// A close frame was sent or received; only the close exchange remains.
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Handshaking,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State cell shared between a connection and its session handles.
#[derive(Clone, Debug, Default)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    /// Current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState { ConnectionState::from_u8(self.0.load(Ordering::Acquire)) }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

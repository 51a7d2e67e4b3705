//! Canonical error and result types for the crate.
//!
//! Each layer keeps its own error enum; [`Error`] gathers them for callers
//! that only need one surface.

use std::io;

use thiserror::Error;

use crate::{codec::ProtocolError, connection::StateError, handshake::HandshakeError};

/// Top-level error type exposed by `wsgate`.
#[derive(Debug, Error)]
pub enum Error {
    /// The upgrade was refused; no connection exists.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The peer broke the framing rules; the connection is closing.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The transport failed; only the affected connection is lost.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// An operation was attempted in the wrong connection state.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl Error {
    /// Whether the error ends the connection it occurred on.
    #[must_use]
    pub fn is_fatal(&self) -> bool { !matches!(self, Self::State(_)) }
}

/// Canonical result alias used by `wsgate` public APIs.
pub type Result<T> = std::result::Result<T, Error>;

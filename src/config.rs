//! Per-connection configuration.
//!
//! Every limit is clamped into a workable range when set, so a
//! [`ConnectionConfig`] is always valid once constructed.

use std::time::Duration;

use crate::{
    codec::{DEFAULT_MAX_FRAME_LENGTH, MIN_FRAME_LENGTH, clamp_frame_length},
    handshake::DEFAULT_MAX_HANDSHAKE_LEN,
};

/// Default cap on a reassembled message (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
/// Largest accepted message cap (1 GiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 1024;
/// Default depth of each session's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;
/// Default time allowed for the client to send its upgrade request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const MIN_HANDSHAKE_LEN: usize = 256;
const MAX_HANDSHAKE_LEN: usize = 64 * 1024;

/// Limits and options applied to every accepted connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    max_frame_size: usize,
    max_message_size: usize,
    outbound_capacity: usize,
    handshake_timeout: Duration,
    max_handshake_len: usize,
    allow_origin: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_LENGTH,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_handshake_len: DEFAULT_MAX_HANDSHAKE_LEN,
            allow_origin: None,
        }
    }
}

impl ConnectionConfig {
    /// Largest payload accepted in one inbound frame, clamped to
    /// `125..=64 MiB`.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = clamp_frame_length(size);
        self
    }

    /// Largest reassembled message, clamped to `125 bytes..=1 GiB`.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.clamp(MIN_FRAME_LENGTH, MAX_MESSAGE_SIZE);
        self
    }

    /// Depth of the outbound queue behind each session handle; at least 1.
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Time allowed for the upgrade request to arrive.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Largest upgrade request head, clamped to `256 bytes..=64 KiB`.
    #[must_use]
    pub fn with_max_handshake_len(mut self, len: usize) -> Self {
        self.max_handshake_len = len.clamp(MIN_HANDSHAKE_LEN, MAX_HANDSHAKE_LEN);
        self
    }

    /// Origin advertised in `Access-Control-Allow-Origin` on `426` responses.
    #[must_use]
    pub fn with_allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = Some(origin.into());
        self
    }

    /// See [`with_max_frame_size`](Self::with_max_frame_size).
    #[must_use]
    pub const fn max_frame_size(&self) -> usize { self.max_frame_size }

    /// See [`with_max_message_size`](Self::with_max_message_size).
    #[must_use]
    pub const fn max_message_size(&self) -> usize { self.max_message_size }

    /// See [`with_outbound_capacity`](Self::with_outbound_capacity).
    #[must_use]
    pub const fn outbound_capacity(&self) -> usize { self.outbound_capacity }

    /// See [`with_handshake_timeout`](Self::with_handshake_timeout).
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration { self.handshake_timeout }

    /// See [`with_max_handshake_len`](Self::with_max_handshake_len).
    #[must_use]
    pub const fn max_handshake_len(&self) -> usize { self.max_handshake_len }

    /// See [`with_allow_origin`](Self::with_allow_origin).
    #[must_use]
    pub fn allow_origin(&self) -> Option<&str> { self.allow_origin.as_deref() }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::codec::MAX_FRAME_LENGTH;

    #[rstest]
    #[case(0, MIN_FRAME_LENGTH)]
    #[case(4096, 4096)]
    #[case(usize::MAX, MAX_FRAME_LENGTH)]
    fn frame_size_is_clamped(#[case] requested: usize, #[case] expected: usize) {
        let config = ConnectionConfig::default().with_max_frame_size(requested);
        assert_eq!(config.max_frame_size(), expected);
    }

    #[test]
    fn limits_are_clamped() {
        let config = ConnectionConfig::default()
            .with_max_message_size(1)
            .with_outbound_capacity(0)
            .with_max_handshake_len(usize::MAX);
        assert_eq!(config.max_message_size(), MIN_FRAME_LENGTH);
        assert_eq!(config.outbound_capacity(), 1);
        assert_eq!(config.max_handshake_len(), MAX_HANDSHAKE_LEN);
    }

    #[test]
    fn defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_frame_size(), DEFAULT_MAX_FRAME_LENGTH);
        assert_eq!(config.outbound_capacity(), DEFAULT_OUTBOUND_CAPACITY);
        assert_eq!(config.handshake_timeout(), DEFAULT_HANDSHAKE_TIMEOUT);
        assert!(config.allow_origin().is_none());
    }
}

//! Registry of active connection session handles.
//!
//! `SessionRegistry` hands out monotonically increasing [`ConnectionId`]s
//! and maps them to [`SessionHandle`]s so any task can send to one
//! connection or broadcast to all of them. Entries are inserted once the
//! handshake succeeds and removed exactly once when the connection ends.
//! Handles whose driver has gone away can be pruned opportunistically.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::{
    message::Message,
    push::{PushError, SessionHandle},
};

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// Outcome of [`SessionRegistry::broadcast`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the message was queued for, in ascending id order.
    pub delivered: Vec<ConnectionId>,
    /// Open sessions that could not take the message.
    pub failed: Vec<(ConnectionId, PushError)>,
}

impl BroadcastReport {
    /// Whether every targeted session accepted the message.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.failed.is_empty() }
}

/// Concurrent registry of session handles keyed by [`ConnectionId`].
#[derive(Debug)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: DashMap<ConnectionId, SessionHandle>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: DashMap::new(),
        }
    }
}

impl SessionRegistry {
    /// Create an empty registry. The first identifier handed out is 1.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Allocate a fresh identifier. Identifiers are never reused.
    pub fn register(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a handle for a newly opened connection.
    pub fn insert(&self, id: ConnectionId, handle: SessionHandle) { self.sessions.insert(id, handle); }

    /// Remove a handle, typically on connection teardown.
    ///
    /// Returns `true` only for the call that removed the entry.
    pub fn unregister(&self, id: ConnectionId) -> bool { self.sessions.remove(&id).is_some() }

    /// Retrieve the handle for `id`.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<SessionHandle> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Queue `message` for a single connection.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::UnknownConnection`] when `id` is not registered,
    /// otherwise any error from [`SessionHandle::send`].
    pub fn send(&self, id: ConnectionId, message: impl Into<Message>) -> Result<(), PushError> {
        self.get(id)
            .ok_or(PushError::UnknownConnection(id))?
            .send(message)
    }

    /// Snapshot the registered handles in ascending id order.
    ///
    /// The shard locks are released before the snapshot is returned.
    #[must_use]
    pub fn active_handles(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
        handles.sort_by_key(SessionHandle::id);
        handles
    }

    /// Queue `message` for every open session except `exclude`.
    ///
    /// Sessions are visited in registration order. Sessions that are not
    /// open are skipped; open sessions that refuse the message are listed in
    /// [`BroadcastReport::failed`] and never stop the broadcast.
    pub fn broadcast(&self, message: &Message, exclude: Option<ConnectionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for handle in self.active_handles() {
            let id = handle.id();
            if Some(id) == exclude || !handle.is_open() {
                continue;
            }
            match handle.send(message.clone()) {
                Ok(()) => report.delivered.push(id),
                Err(err) => report.failed.push((id, err)),
            }
        }
        report
    }

    /// Identifiers of the registered connections, ascending.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize { self.sessions.len() }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.sessions.is_empty() }

    /// Remove handles whose driver has gone away.
    ///
    /// `DashMap::retain` acquires per-bucket write locks, so other operations
    /// may contend briefly while the registry is pruned.
    pub fn prune(&self) { self.sessions.retain(|_, handle| !handle.is_closed()); }
}

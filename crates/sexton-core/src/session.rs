//! Session cursors and the registry that owns them.
//!
//! Each connected viewer session has a cursor: the time up to which it has
//! been sent deletion updates. The dispatcher and the prune scheduler only
//! ever touch cursors through [`SessionRegistry`], so the server is free to
//! keep its sessions wherever it likes.

use crate::clock::Timestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a connected session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Access to connected sessions and their deletion cursors.
pub trait SessionRegistry: Send + Sync {
    /// Visit every connected session with its current cursor.
    ///
    /// `f` must not call back into the registry.
    fn for_each_connected(&self, f: &mut dyn FnMut(&SessionId, Timestamp));

    /// Cursor of a session, `None` if it is not connected.
    fn cursor_of(&self, session: &SessionId) -> Option<Timestamp>;

    /// Move a session's cursor forward.
    ///
    /// A value lower than the current cursor is ignored. Returns `false` if
    /// the session is not connected.
    fn set_cursor(&self, session: &SessionId, cursor: Timestamp) -> bool;

    /// Take the next packet sequence number for a session (wrapping).
    fn next_sequence_number(&self, session: &SessionId) -> Option<u16>;

    /// Account packets and bytes sent to a session.
    fn record_sent(&self, session: &SessionId, packets: u64, bytes: u64);

    /// Number of connected sessions.
    fn connected_count(&self) -> usize {
        let mut count = 0;
        self.for_each_connected(&mut |_, _| count += 1);
        count
    }
}

impl<R: SessionRegistry + ?Sized> SessionRegistry for Arc<R> {
    fn for_each_connected(&self, f: &mut dyn FnMut(&SessionId, Timestamp)) {
        (**self).for_each_connected(f)
    }

    fn cursor_of(&self, session: &SessionId) -> Option<Timestamp> {
        (**self).cursor_of(session)
    }

    fn set_cursor(&self, session: &SessionId, cursor: Timestamp) -> bool {
        (**self).set_cursor(session, cursor)
    }

    fn next_sequence_number(&self, session: &SessionId) -> Option<u16> {
        (**self).next_sequence_number(session)
    }

    fn record_sent(&self, session: &SessionId, packets: u64, bytes: u64) {
        (**self).record_sent(session, packets, bytes)
    }

    fn connected_count(&self) -> usize {
        (**self).connected_count()
    }
}

/// Per-session deletion state.
#[derive(Debug)]
struct SessionCursor {
    attached_at: Timestamp,
    last_sent_at: AtomicU64,
    sequence: AtomicU16,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl SessionCursor {
    fn new(attached_at: Timestamp, cursor: Timestamp) -> Self {
        SessionCursor {
            attached_at,
            last_sent_at: AtomicU64::new(cursor.as_micros()),
            sequence: AtomicU16::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    fn last_sent_at(&self) -> Timestamp {
        Timestamp::from_micros(self.last_sent_at.load(Ordering::Acquire))
    }

    fn advance(&self, cursor: Timestamp) {
        self.last_sent_at
            .fetch_max(cursor.as_micros(), Ordering::AcqRel);
    }

    fn next_sequence(&self) -> u16 {
        // fetch_add on atomics wraps on overflow
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            attached_at: self.attached_at,
            last_sent_at: self.last_sent_at(),
            next_sequence: self.sequence.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a session's deletion bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub attached_at: Timestamp,
    pub last_sent_at: Timestamp,
    pub next_sequence: u16,
    pub packets_sent: u64,
    pub bytes_sent: u64,
}

/// In-process session registry.
///
/// Cursors are atomics, so dispatch for different sessions never contends on
/// anything but the map's read lock.
#[derive(Debug, Default)]
pub struct MemorySessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionCursor>>>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session whose cursor starts at the attach time.
    ///
    /// A freshly attached session receives the current world through the
    /// regular entity traffic, so it only needs deletions from now on.
    /// Returns `false` if the session was already attached.
    pub fn attach(&self, session: SessionId, now: Timestamp) -> bool {
        self.attach_at(session, now, now)
    }

    /// Attach a session with an explicit starting cursor.
    pub fn attach_at(&self, session: SessionId, now: Timestamp, cursor: Timestamp) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session) {
            return false;
        }
        tracing::debug!(session = %session, cursor = cursor.as_micros(), "session attached");
        sessions.insert(session, Arc::new(SessionCursor::new(now, cursor)));
        true
    }

    /// Detach a session, dropping its cursor. Returns `false` if unknown.
    pub fn detach(&self, session: &SessionId) -> bool {
        let removed = self.sessions.write().remove(session).is_some();
        if removed {
            tracing::debug!(session = %session, "session detached");
        }
        removed
    }

    pub fn is_connected(&self, session: &SessionId) -> bool {
        self.sessions.read().contains_key(session)
    }

    pub fn stats_of(&self, session: &SessionId) -> Option<SessionStats> {
        self.get(session).map(|cursor| cursor.stats())
    }

    /// Ids of all connected sessions, sorted.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn get(&self, session: &SessionId) -> Option<Arc<SessionCursor>> {
        self.sessions.read().get(session).cloned()
    }
}

impl SessionRegistry for MemorySessionRegistry {
    fn for_each_connected(&self, f: &mut dyn FnMut(&SessionId, Timestamp)) {
        let sessions = self.sessions.read();
        for (id, cursor) in sessions.iter() {
            f(id, cursor.last_sent_at());
        }
    }

    fn cursor_of(&self, session: &SessionId) -> Option<Timestamp> {
        self.get(session).map(|cursor| cursor.last_sent_at())
    }

    fn set_cursor(&self, session: &SessionId, cursor: Timestamp) -> bool {
        match self.get(session) {
            Some(entry) => {
                entry.advance(cursor);
                true
            }
            None => false,
        }
    }

    fn next_sequence_number(&self, session: &SessionId) -> Option<u16> {
        self.get(session).map(|cursor| cursor.next_sequence())
    }

    fn record_sent(&self, session: &SessionId, packets: u64, bytes: u64) {
        if let Some(cursor) = self.get(session) {
            cursor.packets_sent.fetch_add(packets, Ordering::Relaxed);
            cursor.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    fn connected_count(&self) -> usize {
        self.len()
    }
}

//! Tombstone ledger: the record of recently deleted entities.
//!
//! The ledger keeps every deletion, keyed by the time it happened, until the
//! prune scheduler decides no connected session can still need it.
//!
//! ```text
//! record(id, t)        ledger[t] ∪= {id}
//! query_window(s)      [(t, id) for t > s], ascending t, ascending id
//! prune(w)             drop every t < w
//! ```
//!
//! Sessions learn about deletions by asking for everything after their
//! cursor, so the ordering across timestamps is the one invariant queries
//! must keep. Within a single timestamp ids come back in ascending order,
//! which keeps repeated queries stable.

use crate::clock::Timestamp;
use crate::entity::EntityId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

/// A ledger shared between the entity store, dispatchers and the pruner.
///
/// Readers (`query_window`, `has_any_since`) share the lock; `record` and
/// `prune` take it exclusively.
pub type SharedLedger = Arc<RwLock<TombstoneLedger>>;

/// One deletion: which entity, and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TombstoneRecord {
    pub deleted_at: Timestamp,
    pub entity_id: EntityId,
}

/// Ordered, prunable record of deletions.
#[derive(Clone, Debug, Default)]
pub struct TombstoneLedger {
    /// deleted_at -> ids deleted at that instant
    entries: BTreeMap<Timestamp, BTreeSet<EntityId>>,
    /// Total number of (timestamp, id) pairs held.
    len: usize,
    /// Records removed by prune over the ledger's lifetime.
    total_pruned: u64,
    /// Records inserted over the ledger's lifetime.
    total_recorded: u64,
}

impl TombstoneLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty ledger behind a shared lock.
    pub fn shared() -> SharedLedger {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record that `entity_id` was deleted at `deleted_at`.
    ///
    /// Recording the same pair twice keeps a single record.
    pub fn record(&mut self, entity_id: EntityId, deleted_at: Timestamp) {
        if self.entries.entry(deleted_at).or_default().insert(entity_id) {
            self.len += 1;
            self.total_recorded += 1;
        }
    }

    /// Every record strictly newer than `since_exclusive`, oldest first.
    ///
    /// The result is an owned snapshot; records added afterwards do not
    /// show up in it.
    pub fn query_window(&self, since_exclusive: Timestamp) -> Vec<TombstoneRecord> {
        self.window(since_exclusive)
            .flat_map(|(&deleted_at, ids)| {
                ids.iter().map(move |&entity_id| TombstoneRecord {
                    deleted_at,
                    entity_id,
                })
            })
            .collect()
    }

    /// Ids deleted strictly after `since_exclusive`, oldest first.
    pub fn ids_since(&self, since_exclusive: Timestamp) -> Vec<EntityId> {
        self.window(since_exclusive)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Whether anything was deleted strictly after `since_exclusive`.
    pub fn has_any_since(&self, since_exclusive: Timestamp) -> bool {
        self.window(since_exclusive).next().is_some()
    }

    /// Whether the ledger holds any record at all.
    pub fn has_any(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Forget every record with `deleted_at < before_inclusive`.
    ///
    /// Returns the number of records removed. Pruning an already pruned or
    /// empty range removes nothing.
    pub fn prune(&mut self, before_inclusive: Timestamp) -> usize {
        let kept = self.entries.split_off(&before_inclusive);
        let dropped = std::mem::replace(&mut self.entries, kept);

        let removed: usize = dropped.values().map(BTreeSet::len).sum();
        self.len -= removed;
        self.total_pruned += removed as u64;
        removed
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct deletion instants held.
    pub fn timestamp_count(&self) -> usize {
        self.entries.len()
    }

    /// Time of the oldest record held.
    pub fn oldest(&self) -> Option<Timestamp> {
        self.entries.keys().next().copied()
    }

    /// Time of the newest record held.
    pub fn newest(&self) -> Option<Timestamp> {
        self.entries.keys().next_back().copied()
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            records: self.len,
            timestamps: self.entries.len(),
            oldest: self.oldest(),
            newest: self.newest(),
            total_recorded: self.total_recorded,
            total_pruned: self.total_pruned,
        }
    }

    fn window(
        &self,
        since_exclusive: Timestamp,
    ) -> impl Iterator<Item = (&Timestamp, &BTreeSet<EntityId>)> + '_ {
        self.entries
            .range((Bound::Excluded(since_exclusive), Bound::Unbounded))
    }
}

/// Statistics about the ledger's contents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub records: usize,
    pub timestamps: usize,
    pub oldest: Option<Timestamp>,
    pub newest: Option<Timestamp>,
    pub total_recorded: u64,
    pub total_pruned: u64,
}

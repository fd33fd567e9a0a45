//! # sexton-core
//!
//! Core data structures for the Sexton deletion subsystem.
//!
//! This crate provides:
//! - Entity ids: fixed-width 128-bit identifiers
//! - Clocks: microsecond timestamps, wall-clock and manual clocks
//! - The tombstone ledger: ordered, prunable record of deletions
//! - Session cursors: how far each session has been told about deletions
//!
//! ## Example
//!
//! ```rust
//! use sexton_core::{EntityId, TombstoneLedger, Timestamp};
//!
//! let mut ledger = TombstoneLedger::new();
//! let id = EntityId::new();
//! ledger.record(id, Timestamp::from_micros(1_000));
//!
//! assert!(ledger.has_any_since(Timestamp::from_micros(999)));
//! assert_eq!(ledger.ids_since(Timestamp::ZERO), vec![id]);
//!
//! ledger.prune(Timestamp::from_micros(1_001));
//! assert!(!ledger.has_any());
//! ```

pub mod clock;
pub mod entity;
pub mod ledger;
pub mod session;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock, Timestamp};
pub use entity::{EntityId, ENTITY_ID_LEN};
pub use ledger::{LedgerStats, SharedLedger, TombstoneLedger, TombstoneRecord};
pub use session::{MemorySessionRegistry, SessionId, SessionRegistry, SessionStats};

//! # sexton-gc
//!
//! Tombstone garbage collection for the Sexton deletion subsystem.
//!
//! This crate provides:
//! - Watermarks: the earliest cursor over all connected sessions
//! - Lag detection: sessions holding collection back
//! - The prune scheduler: drops tombstones every session has been told about
//!
//! ## Collection
//!
//! A tombstone may only be forgotten once every connected session's cursor
//! has moved past it. The scheduler never evicts a session; a session that
//! stops draining pins the watermark and shows up in `lagging_sessions`.
//!
//! ## Example
//!
//! ```rust
//! use sexton_core::{
//!     EntityId, ManualClock, MemorySessionRegistry, SessionId, Timestamp, TombstoneLedger,
//! };
//! use sexton_gc::PruneScheduler;
//! use std::sync::Arc;
//!
//! let ledger = TombstoneLedger::shared();
//! let registry = Arc::new(MemorySessionRegistry::new());
//! registry.attach(SessionId::new("viewer"), Timestamp::from_micros(10));
//!
//! ledger.write().record(EntityId::from_u128(1), Timestamp::from_micros(5));
//! ledger.write().record(EntityId::from_u128(2), Timestamp::from_micros(15));
//!
//! let clock = ManualClock::new(Timestamp::from_micros(100));
//! let scheduler = PruneScheduler::new(ledger.clone(), registry, clock);
//!
//! assert_eq!(scheduler.prune_tick().removed(), 1);
//! assert_eq!(ledger.read().len(), 1);
//! ```

mod scheduler;
mod watermark;

pub use scheduler::{
    EmptyRegistryPolicy, PruneConfig, PruneOutcome, PruneScheduler, PruneStats, SkipReason,
};
pub use watermark::{lagging_sessions, LaggingSession, Watermark, WatermarkSource};

//! Periodic tombstone collection.
//!
//! The PruneScheduler runs on a coarse timer. Each tick it computes the
//! watermark over connected sessions and drops every tombstone older than
//! it. It never evicts sessions: a stalled session simply holds the
//! watermark back and is reported as lagging.

use crate::watermark::{lagging_sessions, LaggingSession, Watermark};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sexton_core::{Clock, SessionRegistry, SharedLedger, Timestamp};
use std::sync::Arc;
use std::time::Duration;

/// What to do on a prune tick when no session is connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRegistryPolicy {
    /// Prune at `now + 1µs`: nobody is left to tell, so everything recorded
    /// so far is forgotten. A session attaching right afterwards will not
    /// learn about deletions that happened just before it arrived.
    #[default]
    ForgetAll,

    /// Leave the ledger untouched until some session is connected again.
    RetainAll,
}

/// Configuration for the prune scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneConfig {
    pub empty_registry_policy: EmptyRegistryPolicy,

    /// Cursor lag after which a session is reported as holding back collection.
    pub stall_warning_after: Duration,
}

impl Default for PruneConfig {
    fn default() -> Self {
        PruneConfig {
            empty_registry_policy: EmptyRegistryPolicy::ForgetAll,
            stall_warning_after: Duration::from_secs(30),
        }
    }
}

/// Why a prune tick did nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The ledger held no tombstones.
    EmptyLedger,

    /// No session was connected and the policy retains everything.
    RetainedWithoutSessions,
}

/// Result of one prune tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PruneOutcome {
    Skipped(SkipReason),
    Pruned {
        watermark: Watermark,
        removed: usize,
        remaining: usize,
    },
}

impl PruneOutcome {
    /// Records removed by this tick.
    pub fn removed(&self) -> usize {
        match self {
            PruneOutcome::Skipped(_) => 0,
            PruneOutcome::Pruned { removed, .. } => *removed,
        }
    }

    pub fn watermark(&self) -> Option<&Watermark> {
        match self {
            PruneOutcome::Skipped(_) => None,
            PruneOutcome::Pruned { watermark, .. } => Some(watermark),
        }
    }
}

/// Cumulative statistics about prune ticks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub ticks: u64,
    pub skipped: u64,
    pub records_pruned: u64,
    pub last_watermark: Option<Timestamp>,
}

/// Drops tombstones no connected session still needs.
pub struct PruneScheduler<R: SessionRegistry + ?Sized, C: Clock> {
    ledger: SharedLedger,
    registry: Arc<R>,
    clock: C,
    config: PruneConfig,
    stats: Mutex<PruneStats>,
}

impl<R: SessionRegistry + ?Sized, C: Clock> PruneScheduler<R, C> {
    /// Create a scheduler with the default configuration.
    pub fn new(ledger: SharedLedger, registry: Arc<R>, clock: C) -> Self {
        Self::with_config(ledger, registry, clock, PruneConfig::default())
    }

    pub fn with_config(
        ledger: SharedLedger,
        registry: Arc<R>,
        clock: C,
        config: PruneConfig,
    ) -> Self {
        PruneScheduler {
            ledger,
            registry,
            clock,
            config,
            stats: Mutex::new(PruneStats::default()),
        }
    }

    pub fn config(&self) -> &PruneConfig {
        &self.config
    }

    pub fn stats(&self) -> PruneStats {
        self.stats.lock().clone()
    }

    /// Current watermark, without pruning anything.
    pub fn watermark(&self) -> Watermark {
        Watermark::compute(self.registry.as_ref(), self.clock.now())
    }

    /// Sessions whose cursor trails by more than `stall_warning_after`.
    pub fn lagging_sessions(&self) -> Vec<LaggingSession> {
        lagging_sessions(
            self.registry.as_ref(),
            self.clock.now(),
            self.config.stall_warning_after,
        )
    }

    /// Run one collection pass.
    pub fn prune_tick(&self) -> PruneOutcome {
        let outcome = self.collect();

        let mut stats = self.stats.lock();
        stats.ticks += 1;
        match &outcome {
            PruneOutcome::Skipped(_) => stats.skipped += 1,
            PruneOutcome::Pruned {
                watermark, removed, ..
            } => {
                stats.records_pruned += *removed as u64;
                stats.last_watermark = Some(watermark.value);
            }
        }

        outcome
    }

    fn collect(&self) -> PruneOutcome {
        if !self.ledger.read().has_any() {
            return PruneOutcome::Skipped(SkipReason::EmptyLedger);
        }

        let now = self.clock.now();
        let watermark = Watermark::compute(self.registry.as_ref(), now);

        if watermark.is_unbounded()
            && self.config.empty_registry_policy == EmptyRegistryPolicy::RetainAll
        {
            tracing::debug!("no sessions connected, retaining tombstones");
            return PruneOutcome::Skipped(SkipReason::RetainedWithoutSessions);
        }

        let stall_after = self.config.stall_warning_after;
        for lagging in lagging_sessions(self.registry.as_ref(), now, stall_after) {
            tracing::warn!(
                session = %lagging.session,
                cursor = lagging.cursor.as_micros(),
                lag_ms = lagging.lag.as_millis() as u64,
                "session is holding back tombstone collection"
            );
        }

        let (removed, remaining) = {
            let mut ledger = self.ledger.write();
            let removed = ledger.prune(watermark.value);
            (removed, ledger.len())
        };

        tracing::debug!(
            watermark = watermark.value.as_micros(),
            sessions = watermark.sessions,
            removed,
            remaining,
            "pruned tombstones"
        );

        PruneOutcome::Pruned {
            watermark,
            removed,
            remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sexton_core::{EntityId, ManualClock, MemorySessionRegistry, SessionId, TombstoneLedger};

    fn ts(micros: u64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    fn setup(
        now: u64,
    ) -> (
        SharedLedger,
        Arc<MemorySessionRegistry>,
        Arc<ManualClock>,
    ) {
        (
            TombstoneLedger::shared(),
            Arc::new(MemorySessionRegistry::new()),
            Arc::new(ManualClock::new(ts(now))),
        )
    }

    #[test]
    fn test_empty_ledger_is_skipped() {
        let (ledger, registry, clock) = setup(100);
        let scheduler = PruneScheduler::new(ledger, registry, clock);

        assert_eq!(
            scheduler.prune_tick(),
            PruneOutcome::Skipped(SkipReason::EmptyLedger)
        );
        assert_eq!(scheduler.stats().skipped, 1);
    }

    #[test]
    fn test_prunes_below_slowest_session() {
        let (ledger, registry, clock) = setup(100);
        registry.attach(SessionId::new("x"), ts(10));
        registry.attach(SessionId::new("y"), ts(20));
        {
            let mut l = ledger.write();
            l.record(EntityId::from_u128(1), ts(5));
            l.record(EntityId::from_u128(2), ts(15));
            l.record(EntityId::from_u128(3), ts(25));
        }
        let scheduler = PruneScheduler::new(ledger.clone(), registry, clock);

        let outcome = scheduler.prune_tick();

        assert_eq!(outcome.removed(), 1);
        assert_eq!(outcome.watermark().unwrap().value, ts(10));
        assert_eq!(ledger.read().oldest(), Some(ts(15)));
        assert_eq!(scheduler.stats().last_watermark, Some(ts(10)));
    }

    #[test]
    fn test_retain_all_policy_keeps_everything() {
        let (ledger, registry, clock) = setup(100);
        ledger.write().record(EntityId::from_u128(1), ts(50));
        let config = PruneConfig {
            empty_registry_policy: EmptyRegistryPolicy::RetainAll,
            ..Default::default()
        };
        let scheduler = PruneScheduler::with_config(ledger.clone(), registry, clock, config);

        assert_eq!(
            scheduler.prune_tick(),
            PruneOutcome::Skipped(SkipReason::RetainedWithoutSessions)
        );
        assert_eq!(ledger.read().len(), 1);
    }

    #[test]
    fn test_lagging_sessions_use_configured_threshold() {
        let (ledger, registry, clock) = setup(60_000_000);
        registry.attach(SessionId::new("stuck"), ts(1_000_000));
        registry.attach(SessionId::new("live"), ts(59_000_000));
        let scheduler = PruneScheduler::new(ledger, registry, clock);

        let lagging = scheduler.lagging_sessions();
        assert_eq!(lagging.len(), 1);
        assert_eq!(lagging[0].session, SessionId::new("stuck"));
    }

    #[test]
    fn test_policy_serializes_as_snake_case() {
        let json = serde_json::to_string(&EmptyRegistryPolicy::RetainAll).unwrap();
        assert_eq!(json, "\"retain_all\"");
    }
}

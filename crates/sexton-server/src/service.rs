//! The deletion service: the surface the entity store and session layer
//! talk to, plus the background loops that drive dispatch and collection.

use crate::config::DeletionConfig;
use crate::dispatcher::{DeletionDispatcher, DispatchRoundStats, FlushStats};
use crate::error::{ConfigError, DispatchError};
use crate::transport::Transport;
use sexton_core::{
    Clock, EntityId, LedgerStats, SessionId, SessionRegistry, SharedLedger, Timestamp,
    TombstoneLedger,
};
use sexton_gc::{LaggingSession, PruneOutcome, PruneScheduler, PruneStats, Watermark};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Records deletions, flushes them to sessions and collects old tombstones.
pub struct DeletionService<R, T, C>
where
    R: SessionRegistry + ?Sized,
    T: Transport + ?Sized,
    C: Clock,
{
    config: DeletionConfig,
    ledger: SharedLedger,
    clock: Arc<C>,
    dispatcher: DeletionDispatcher<R, T, Arc<C>>,
    scheduler: PruneScheduler<R, Arc<C>>,
}

impl<R, T, C> DeletionService<R, T, C>
where
    R: SessionRegistry + ?Sized,
    T: Transport + ?Sized,
    C: Clock,
{
    /// Build a service with an empty ledger.
    ///
    /// Fails if the configuration is invalid, in particular if a packet
    /// could not carry a single entity id.
    pub fn new(
        config: DeletionConfig,
        registry: Arc<R>,
        transport: Arc<T>,
        clock: C,
    ) -> Result<Self, ConfigError> {
        Self::with_ledger(config, TombstoneLedger::shared(), registry, transport, clock)
    }

    pub fn with_ledger(
        config: DeletionConfig,
        ledger: SharedLedger,
        registry: Arc<R>,
        transport: Arc<T>,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = Arc::new(clock);

        let dispatcher = DeletionDispatcher::new(
            ledger.clone(),
            registry.clone(),
            transport,
            clock.clone(),
            &config,
        )?;
        let scheduler = PruneScheduler::with_config(
            ledger.clone(),
            registry,
            clock.clone(),
            config.prune_config(),
        );

        Ok(Self {
            config,
            ledger,
            clock,
            dispatcher,
            scheduler,
        })
    }

    pub fn config(&self) -> &DeletionConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Record that `id` was deleted at `deleted_at`.
    pub fn record_deletion(&self, id: EntityId, deleted_at: Timestamp) {
        self.ledger.write().record(id, deleted_at);
    }

    /// Record that `id` was deleted now, returning the timestamp used.
    ///
    /// The time is read while holding the write lock, so it can never fall
    /// before the snapshot of a flush whose ledger read has already finished.
    pub fn record_deletion_now(&self, id: EntityId) -> Timestamp {
        let mut ledger = self.ledger.write();
        let now = self.clock.now();
        ledger.record(id, now);
        now
    }

    pub fn has_pending_deletions(&self, session: &SessionId) -> bool {
        self.dispatcher.has_pending(session)
    }

    pub fn flush_deletions(&self, session: &SessionId) -> Result<FlushStats, DispatchError> {
        self.dispatcher.flush(session)
    }

    pub fn dispatch_round(&self) -> DispatchRoundStats {
        self.dispatcher.dispatch_round()
    }

    pub fn prune_tick(&self) -> PruneOutcome {
        self.scheduler.prune_tick()
    }

    pub fn watermark(&self) -> Watermark {
        self.scheduler.watermark()
    }

    pub fn lagging_sessions(&self) -> Vec<LaggingSession> {
        self.scheduler.lagging_sessions()
    }

    pub fn ledger_stats(&self) -> LedgerStats {
        self.ledger.read().stats()
    }

    pub fn prune_stats(&self) -> PruneStats {
        self.scheduler.stats()
    }
}

impl<R, T, C> DeletionService<R, T, C>
where
    R: SessionRegistry + ?Sized + 'static,
    T: Transport + ?Sized + 'static,
    C: Clock + 'static,
{
    /// Start the dispatch and prune loops on the current tokio runtime.
    pub fn spawn(self: Arc<Self>) -> ServiceHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatch = tokio::spawn(self.clone().dispatch_loop(shutdown_rx.clone()));
        let prune = tokio::spawn(self.prune_loop(shutdown_rx));

        ServiceHandle {
            shutdown_tx,
            dispatch,
            prune,
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.dispatch_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let round = self.dispatch_round();
                    if round.sessions_flushed > 0 {
                        tracing::trace!(
                            sessions = round.sessions_flushed,
                            packets = round.packets_sent,
                            "dispatch round"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("dispatch loop stopped");
    }

    async fn prune_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.prune_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.prune_tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("prune loop stopped");
    }
}

/// Handle to the background loops started by [`DeletionService::spawn`].
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
    dispatch: JoinHandle<()>,
    prune: JoinHandle<()>,
}

impl ServiceHandle {
    /// Stop both loops and wait for them to finish their current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        for (name, task) in [("dispatch", self.dispatch), ("prune", self.prune)] {
            if let Err(e) = task.await {
                tracing::warn!(task = name, error = %e, "service task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.dispatch.is_finished() && self.prune.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeletionConfigBuilder;
    use crate::transport::ChannelTransport;
    use sexton_core::{ManualClock, MemorySessionRegistry};

    #[test]
    fn test_rejects_invalid_config() {
        let config = DeletionConfig {
            max_packet_bytes: 8,
            ..DeletionConfig::default()
        };
        let result = DeletionService::new(
            config,
            Arc::new(MemorySessionRegistry::new()),
            Arc::new(ChannelTransport::new()),
            ManualClock::new(Timestamp::ZERO),
        );
        assert!(matches!(result, Err(ConfigError::Wire(_))));
    }

    #[test]
    fn test_record_deletion_now_uses_clock() {
        let config = DeletionConfigBuilder::new().build().unwrap();
        let service = DeletionService::new(
            config,
            Arc::new(MemorySessionRegistry::new()),
            Arc::new(ChannelTransport::new()),
            ManualClock::new(Timestamp::from_micros(777)),
        )
        .unwrap();

        let at = service.record_deletion_now(EntityId::from_u128(9));

        assert_eq!(at, Timestamp::from_micros(777));
        assert_eq!(service.ledger_stats().records, 1);
    }
}

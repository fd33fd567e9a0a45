use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sexton_core::{
    Clock, EntityId, ManualClock, MemorySessionRegistry, MonotonicClock, SessionId, SystemClock,
    Timestamp,
};
use sexton_gc::EmptyRegistryPolicy;
use sexton_server::{ChannelTransport, ConfigError, DeletionConfig, DeletionService};
use sexton_wire::DeletionPacket;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// One simulated server frame.
const TICK_US: u64 = 16_000;

/// Prune roughly once per second of simulated time.
const PRUNE_EVERY_TICKS: u64 = 60;

const INBOX_CAPACITY: usize = 4096;

type SimService = DeletionService<MemorySessionRegistry, ChannelTransport, Arc<ManualClock>>;

/// Parameters for a deterministic simulation run.
#[derive(Clone, Debug)]
pub struct SimulationParams {
    pub sessions: usize,
    pub deletions: usize,
    pub ticks: u64,
    pub max_packet_bytes: usize,
    /// Chance per session per tick of a disconnect or reconnect.
    pub churn: f64,
    pub policy: EmptyRegistryPolicy,
    pub seed: u64,
}

/// Statistics collected during a simulation run
#[derive(Clone, Debug, Default)]
pub struct SimulationReport {
    pub sessions: usize,
    pub ticks: u64,
    pub deletions_recorded: usize,
    pub flushes: usize,
    pub flush_failures: usize,
    pub packets_sent: usize,
    pub bytes_sent: usize,
    pub ids_delivered: usize,
    pub duplicate_ids: usize,
    pub reconnects: usize,
    pub prune_ticks: u64,
    pub records_pruned: u64,
    pub ledger_remaining: usize,
    /// Deletions a session should have received while attached but did not.
    pub missing: usize,
    pub total_time: Duration,
}

impl SimulationReport {
    pub fn is_consistent(&self) -> bool {
        self.missing == 0
    }

    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Deletion Simulation Statistics                ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Sessions:                  {:>30} ║", self.sessions);
        println!("║  Ticks:                     {:>30} ║", self.ticks);
        println!("║  Deletions Recorded:        {:>30} ║", self.deletions_recorded);
        println!("║  Flushes:                   {:>30} ║", self.flushes);
        println!("║  Flush Failures:            {:>30} ║", self.flush_failures);
        println!("║  Packets Sent:              {:>30} ║", self.packets_sent);
        println!("║  Bytes Sent:                {:>30} ║", self.bytes_sent);
        println!("║  Ids Delivered:             {:>30} ║", self.ids_delivered);
        println!("║  Duplicate Ids (skew):      {:>30} ║", self.duplicate_ids);
        println!("║  Reconnects:                {:>30} ║", self.reconnects);
        println!("║  Prune Ticks:               {:>30} ║", self.prune_ticks);
        println!("║  Records Pruned:            {:>30} ║", self.records_pruned);
        println!("║  Ledger Remaining:          {:>30} ║", self.ledger_remaining);
        println!("║  Missing Deletions:         {:>30} ║", self.missing);
        println!(
            "║  Total Time:                {:>29}s ║",
            format!("{:.3}", self.total_time.as_secs_f64())
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

struct SimSession {
    id: SessionId,
    /// Flush every `pace` ticks.
    pace: u64,
    inbox: Option<mpsc::Receiver<Vec<u8>>>,
    attached_at: Timestamp,
    received: HashSet<EntityId>,
}

impl SimSession {
    fn is_connected(&self) -> bool {
        self.inbox.is_some()
    }

    /// Decode everything waiting in the inbox. Returns (ids, duplicates).
    fn drain(&mut self) -> (usize, usize) {
        let Some(inbox) = self.inbox.as_mut() else {
            return (0, 0);
        };

        let mut delivered = 0;
        let mut duplicates = 0;
        while let Ok(bytes) = inbox.try_recv() {
            match DeletionPacket::decode(&bytes) {
                Ok(packet) => {
                    for id in packet.ids {
                        delivered += 1;
                        if !self.received.insert(id) {
                            duplicates += 1;
                        }
                    }
                }
                Err(e) => tracing::error!(session = %self.id, error = %e, "undecodable packet"),
            }
        }
        (delivered, duplicates)
    }
}

struct World {
    registry: Arc<MemorySessionRegistry>,
    transport: Arc<ChannelTransport>,
    clock: Arc<ManualClock>,
    service: SimService,
    sessions: Vec<SimSession>,
    log: Vec<(EntityId, Timestamp)>,
    report: SimulationReport,
}

impl World {
    fn new(params: &SimulationParams, rng: &mut StdRng) -> Result<Self, ConfigError> {
        let config = DeletionConfig {
            max_packet_bytes: params.max_packet_bytes,
            empty_registry_policy: params.policy,
            ..DeletionConfig::default()
        };
        let registry = Arc::new(MemorySessionRegistry::new());
        let transport = Arc::new(ChannelTransport::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_micros(1_000_000)));
        let service =
            DeletionService::new(config, registry.clone(), transport.clone(), clock.clone())?;

        let mut world = World {
            registry,
            transport,
            clock,
            service,
            sessions: Vec::with_capacity(params.sessions),
            log: Vec::with_capacity(params.deletions),
            report: SimulationReport {
                sessions: params.sessions,
                ticks: params.ticks,
                ..SimulationReport::default()
            },
        };

        for i in 0..params.sessions {
            let mut session = SimSession {
                id: SessionId::new(format!("viewer-{:02}", i)),
                pace: rng.gen_range(1..=8),
                inbox: None,
                attached_at: Timestamp::ZERO,
                received: HashSet::new(),
            };
            world.connect(&mut session);
            world.sessions.push(session);
        }

        Ok(world)
    }

    fn connect(&self, session: &mut SimSession) {
        let now = self.clock.now();
        self.registry.attach(session.id.clone(), now);
        session.inbox = Some(self.transport.register(session.id.clone(), INBOX_CAPACITY));
        session.attached_at = now;
        session.received.clear();
    }

    fn disconnect(&self, session: &mut SimSession) {
        self.registry.detach(&session.id);
        self.transport.unregister(&session.id);
        session.inbox = None;
    }

    fn churn(&mut self, rng: &mut StdRng, chance: f64) {
        let mut sessions = std::mem::take(&mut self.sessions);
        for session in &mut sessions {
            if !rng.gen_bool(chance) {
                continue;
            }
            if session.is_connected() {
                self.disconnect(session);
            } else {
                self.connect(session);
                self.report.reconnects += 1;
            }
        }
        self.sessions = sessions;
    }

    fn flush(&mut self, tick: u64, force: bool) {
        for session in &mut self.sessions {
            if !session.is_connected() || (!force && tick % session.pace != 0) {
                continue;
            }
            if !force && !self.service.has_pending_deletions(&session.id) {
                continue;
            }
            match self.service.flush_deletions(&session.id) {
                Ok(stats) => {
                    self.report.flushes += 1;
                    self.report.packets_sent += stats.packets_sent;
                    self.report.bytes_sent += stats.bytes_sent;
                }
                Err(e) => {
                    self.report.flush_failures += 1;
                    tracing::warn!(error = %e, "flush failed");
                }
            }
            let (delivered, duplicates) = session.drain();
            self.report.ids_delivered += delivered;
            self.report.duplicate_ids += duplicates;
        }
    }

    /// Count deletions recorded after a connected session attached that it never saw.
    fn count_missing(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.is_connected())
            .map(|s| {
                self.log
                    .iter()
                    .filter(|(id, at)| *at > s.attached_at && !s.received.contains(id))
                    .count()
            })
            .sum()
    }
}

/// Run a deterministic simulation on a manual clock.
///
/// Sessions drain at different paces and randomly disconnect and reconnect;
/// the prune scheduler runs about once per simulated second. At the end
/// every connected session is flushed once more and checked against the
/// deletion log.
pub fn run_simulation(params: &SimulationParams) -> Result<SimulationReport, ConfigError> {
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut world = World::new(params, &mut rng)?;

    let ticks = params.ticks.max(1);
    let mut per_tick = vec![0usize; ticks as usize];
    for _ in 0..params.deletions {
        per_tick[rng.gen_range(0..ticks as usize)] += 1;
    }

    for tick in 0..ticks {
        world.clock.advance(TICK_US);

        for _ in 0..per_tick[tick as usize] {
            let id = EntityId::from_u128(rng.gen());
            let at = world.service.record_deletion_now(id);
            world.log.push((id, at));
        }

        world.churn(&mut rng, params.churn);
        world.flush(tick, false);

        if tick % PRUNE_EVERY_TICKS == PRUNE_EVERY_TICKS - 1 {
            world.service.prune_tick();
        }
    }

    world.clock.advance(TICK_US);
    world.flush(ticks, true);
    world.service.prune_tick();

    let prune = world.service.prune_stats();
    world.report.deletions_recorded = world.log.len();
    world.report.prune_ticks = prune.ticks;
    world.report.records_pruned = prune.records_pruned;
    world.report.ledger_remaining = world.service.ledger_stats().records;
    world.report.missing = world.count_missing();
    world.report.total_time = start.elapsed();

    Ok(world.report)
}

/// Parameters for a run against the real clock and the spawned loops.
#[derive(Clone, Debug)]
pub struct LiveParams {
    pub sessions: usize,
    pub duration: Duration,
    pub deletions_per_ms: usize,
}

#[derive(Clone, Debug, Default)]
pub struct LiveReport {
    pub sessions: usize,
    pub deletions_recorded: usize,
    pub min_received: usize,
    pub records_pruned: u64,
    pub ledger_remaining: usize,
    pub missing: usize,
    pub total_time: Duration,
}

impl LiveReport {
    pub fn is_consistent(&self) -> bool {
        self.missing == 0
    }

    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Live Service Statistics                       ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Sessions:                  {:>30} ║", self.sessions);
        println!("║  Deletions Recorded:        {:>30} ║", self.deletions_recorded);
        println!("║  Fewest Ids Received:       {:>30} ║", self.min_received);
        println!("║  Records Pruned:            {:>30} ║", self.records_pruned);
        println!("║  Ledger Remaining:          {:>30} ║", self.ledger_remaining);
        println!("║  Missing Deletions:         {:>30} ║", self.missing);
        println!(
            "║  Total Time:                {:>29}s ║",
            format!("{:.3}", self.total_time.as_secs_f64())
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// Run the spawned dispatch and prune loops against the system clock.
pub async fn run_live(
    params: &LiveParams,
    config: DeletionConfig,
) -> Result<LiveReport, ConfigError> {
    let start = Instant::now();
    let registry = Arc::new(MemorySessionRegistry::new());
    let transport = Arc::new(ChannelTransport::new());
    let service = Arc::new(DeletionService::new(
        config,
        registry.clone(),
        transport.clone(),
        MonotonicClock::system(),
    )?);

    let mut consumers = Vec::with_capacity(params.sessions);
    let mut received = Vec::with_capacity(params.sessions);
    for i in 0..params.sessions {
        let id = SessionId::new(format!("live-{:02}", i));
        registry.attach(id.clone(), SystemClock.now());
        let mut inbox = transport.register(id, INBOX_CAPACITY);
        let seen = Arc::new(Mutex::new(HashSet::new()));
        received.push(Arc::clone(&seen));

        consumers.push(tokio::spawn(async move {
            while let Some(bytes) = inbox.recv().await {
                if let Ok(packet) = DeletionPacket::decode(&bytes) {
                    seen.lock().await.extend(packet.ids);
                }
            }
        }));
    }

    let handle = service.clone().spawn();

    let mut recorded = Vec::new();
    let deadline = Instant::now() + params.duration;
    while Instant::now() < deadline {
        for _ in 0..params.deletions_per_ms {
            let id = EntityId::new();
            service.record_deletion_now(id);
            recorded.push(id);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    tokio::time::sleep(service.config().dispatch_interval() * 4).await;
    handle.shutdown().await;
    service.dispatch_round();

    let session_ids = registry.session_ids();
    for id in &session_ids {
        transport.unregister(id);
    }
    for result in join_all(consumers).await {
        if let Err(e) = result {
            tracing::warn!(error = %e, "consumer task failed");
        }
    }

    let mut missing = 0;
    let mut min_received = usize::MAX;
    for seen in &received {
        let seen = seen.lock().await;
        min_received = min_received.min(seen.len());
        missing += recorded.iter().filter(|id| !seen.contains(id)).count();
    }

    let prune = service.prune_stats();
    Ok(LiveReport {
        sessions: params.sessions,
        deletions_recorded: recorded.len(),
        min_received: if received.is_empty() { 0 } else { min_received },
        records_pruned: prune.records_pruned,
        ledger_remaining: service.ledger_stats().records,
        missing,
        total_time: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(seed: u64) -> SimulationParams {
        SimulationParams {
            sessions: 6,
            deletions: 2_000,
            ticks: 300,
            max_packet_bytes: 13 + 8 * 16,
            churn: 0.02,
            policy: EmptyRegistryPolicy::ForgetAll,
            seed,
        }
    }

    #[test]
    fn test_simulation_loses_nothing() {
        for seed in 0..4 {
            let report = run_simulation(&params(seed)).unwrap();
            assert_eq!(report.deletions_recorded, 2_000);
            assert!(report.is_consistent(), "seed {} missed {}", seed, report.missing);
            assert!(report.records_pruned > 0);
        }
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let a = run_simulation(&params(7)).unwrap();
        let b = run_simulation(&params(7)).unwrap();
        assert_eq!(a.packets_sent, b.packets_sent);
        assert_eq!(a.reconnects, b.reconnects);
        assert_eq!(a.records_pruned, b.records_pruned);
    }

    #[tokio::test]
    async fn test_live_run_delivers_everything() {
        let params = LiveParams {
            sessions: 3,
            duration: Duration::from_millis(60),
            deletions_per_ms: 2,
        };
        let config = DeletionConfig {
            dispatch_interval_ms: 5,
            prune_interval_ms: 20,
            ..DeletionConfig::default()
        };

        let report = run_live(&params, config).await.unwrap();

        assert!(report.deletions_recorded > 0);
        assert!(report.is_consistent());
    }
}

//! # Sexton
//!
//! Simulation and demonstration CLI for the deletion propagation subsystem.
//!
//! ```text
//! sexton simulate --sessions 8 --deletions 5000 --ticks 600
//! sexton live --sessions 4 --duration-ms 500
//! sexton scenarios
//! sexton config
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sexton_core::{
    EntityId, ManualClock, MemorySessionRegistry, SessionId, SessionRegistry, Timestamp,
};
use sexton_gc::{EmptyRegistryPolicy, PruneOutcome};
use sexton_server::{ChannelTransport, DeletionConfig, DeletionConfigBuilder, DeletionService};
use sexton_wire::{DeletionPacket, DeletionPacketEncoder, SequenceNumber, HEADER_LEN};
use simulation::{run_live, run_simulation, LiveParams, SimulationParams};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub mod simulation;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "sexton")]
#[command(about = "Deletion propagation and tombstone collection for entity servers")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG directives are honoured too
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deterministic run: sessions with different paces, churn, periodic pruning
    Simulate {
        #[arg(long, default_value_t = 8)]
        sessions: usize,
        #[arg(long, default_value_t = 5_000)]
        deletions: usize,
        #[arg(long, default_value_t = 600)]
        ticks: u64,
        #[arg(long, default_value_t = 1400)]
        max_packet_bytes: usize,
        /// Chance per session per tick of a disconnect or reconnect
        #[arg(long, default_value_t = 0.01)]
        churn: f64,
        #[arg(long, value_enum, default_value_t = Policy::ForgetAll)]
        policy: Policy,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Run the spawned dispatch and prune loops against the system clock
    Live {
        #[arg(long, default_value_t = 4)]
        sessions: usize,
        #[arg(long, default_value_t = 500)]
        duration_ms: u64,
        #[arg(long, default_value_t = 2)]
        deletions_per_ms: usize,
        /// JSON configuration file; defaults apply to missing fields
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
    /// Walk through the reference scenarios step by step
    Scenarios,
    /// Print the default configuration as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    ForgetAll,
    RetainAll,
}

impl From<Policy> for EmptyRegistryPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::ForgetAll => EmptyRegistryPolicy::ForgetAll,
            Policy::RetainAll => EmptyRegistryPolicy::RetainAll,
        }
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn verdict(ok: bool, pass: &str, fail: &str) {
    if ok {
        println!("\n  {} {}", "✓".bright_green().bold(), pass.bright_green().bold());
    } else {
        println!("\n  {} {}", "✗".bright_red().bold(), fail.bright_red().bold());
    }
}

fn ts(micros: u64) -> Timestamp {
    Timestamp::from_micros(micros)
}

fn id(n: u128) -> EntityId {
    EntityId::from_u128(n)
}

fn short_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(|id| id.as_u128().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Scenarios ─────────────────────────────────────────────────────────────

type ScenarioService = DeletionService<MemorySessionRegistry, ChannelTransport, Arc<ManualClock>>;

struct Stage {
    registry: Arc<MemorySessionRegistry>,
    transport: Arc<ChannelTransport>,
    service: ScenarioService,
}

impl Stage {
    fn new(config: DeletionConfig, now: u64) -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Arc::new(MemorySessionRegistry::new());
        let transport = Arc::new(ChannelTransport::new());
        let clock = Arc::new(ManualClock::new(ts(now)));
        let service = DeletionService::new(config, registry.clone(), transport.clone(), clock)?;
        Ok(Stage {
            registry,
            transport,
            service,
        })
    }
}

fn scenario_slowest_session() -> Result<bool, Box<dyn std::error::Error>> {
    section("Scenario A: the slowest session bounds collection");
    let stage = Stage::new(DeletionConfigBuilder::new().skew_tolerance(1).build()?, 30)?;
    let x = SessionId::new("X");
    let y = SessionId::new("Y");
    stage.registry.attach(x.clone(), ts(10));
    stage.registry.attach(y.clone(), ts(20));
    let mut inbox = stage.transport.register(x.clone(), 16);
    step("cursors: X = 10, Y = 20");

    for at in [5u64, 15, 25] {
        stage.service.record_deletion(id(at as u128), ts(at));
    }
    step("deletions recorded at 5, 15, 25");

    let outcome = stage.service.prune_tick();
    step(&format!(
        "prune at watermark {} removed {}",
        outcome.watermark().map(|w| w.value.as_micros()).unwrap_or_default(),
        outcome.removed()
    ));

    let stats = stage.service.flush_deletions(&x)?;
    let mut sent = Vec::new();
    while let Ok(bytes) = inbox.try_recv() {
        sent.extend(DeletionPacket::decode(&bytes)?.ids);
    }
    step(&format!(
        "flush(X) sent [{}], cursor now {}",
        short_ids(&sent),
        stage.registry.cursor_of(&x).map(|c| c.as_micros()).unwrap_or_default()
    ));

    let ok = outcome.removed() == 1 && sent == vec![id(15), id(25)] && stats.snapshot == ts(30);
    verdict(ok, "record 5 collected, X told about 15 and 25", "unexpected outcome");
    Ok(ok)
}

fn scenario_packet_split() -> Result<bool, Box<dyn std::error::Error>> {
    section("Scenario B: five ids, two per packet");
    let encoder = DeletionPacketEncoder::new(HEADER_LEN + 2 * 16)?;
    let mut sequence = SequenceNumber::default();
    let ids: Vec<_> = (1..=5).map(id).collect();

    let packets = encoder.encode(0, ts(1_000), || sequence.next(), ids);
    for packet in &packets {
        step(&format!(
            "packet seq {} carries {} id(s), {} bytes",
            packet.sequence(),
            packet.count(),
            packet.len()
        ));
    }

    let counts: Vec<_> = packets.iter().map(|p| p.count()).collect();
    let ok = counts == vec![2, 2, 1];
    verdict(ok, "counts are [2, 2, 1]", "unexpected packet split");
    Ok(ok)
}

fn scenario_no_sessions() -> Result<bool, Box<dyn std::error::Error>> {
    section("Scenario C: nobody connected");
    let mut ok = true;

    for policy in [EmptyRegistryPolicy::ForgetAll, EmptyRegistryPolicy::RetainAll] {
        let config = DeletionConfigBuilder::new().empty_registry_policy(policy).build()?;
        let stage = Stage::new(config, 100)?;
        stage.service.record_deletion(id(1), ts(40));
        stage.service.record_deletion(id(2), ts(100));

        let outcome = stage.service.prune_tick();
        let remaining = stage.service.ledger_stats().records;
        step(&format!("{:?}: {:?} -> {} record(s) left", policy, summarize(&outcome), remaining));

        ok &= match policy {
            EmptyRegistryPolicy::ForgetAll => remaining == 0,
            EmptyRegistryPolicy::RetainAll => remaining == 2,
        };
    }

    verdict(ok, "forget_all drops everything, retain_all keeps it", "unexpected policy outcome");
    Ok(ok)
}

fn summarize(outcome: &PruneOutcome) -> String {
    match outcome {
        PruneOutcome::Skipped(reason) => format!("skipped ({:?})", reason),
        PruneOutcome::Pruned { watermark, removed, .. } => {
            format!("pruned {} at {}", removed, watermark.value)
        }
    }
}

fn run_scenarios() -> Result<bool, Box<dyn std::error::Error>> {
    header("Deletion propagation scenarios");
    let results = [
        scenario_slowest_session()?,
        scenario_packet_split()?,
        scenario_no_sessions()?,
    ];
    Ok(results.iter().all(|ok| *ok))
}

// ─── Entry point ───────────────────────────────────────────────────────────

fn init_tracing(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut filter = EnvFilter::new(log_level);
    if let Ok(directives) = std::env::var("RUST_LOG") {
        for directive in directives.split(',').filter(|d| !d.is_empty()) {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("Ignoring RUST_LOG directive {:?}: {}", directive, e),
            }
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let ok = match cli.command {
        Commands::Simulate {
            sessions,
            deletions,
            ticks,
            max_packet_bytes,
            churn,
            policy,
            seed,
        } => {
            header("Deterministic deletion simulation");
            let params = SimulationParams {
                sessions,
                deletions,
                ticks,
                max_packet_bytes,
                churn: churn.clamp(0.0, 1.0),
                policy: policy.into(),
                seed,
            };
            let report = run_simulation(&params)?;
            report.print();
            let ok = report.is_consistent();
            verdict(
                ok,
                "every connected session saw every deletion since it attached",
                "some deletions never reached a session",
            );
            ok
        }
        Commands::Live {
            sessions,
            duration_ms,
            deletions_per_ms,
            config,
        } => {
            header("Live service run");
            let config = match config {
                Some(path) => DeletionConfig::from_json_str(&std::fs::read_to_string(path)?)?,
                None => DeletionConfig::default(),
            };
            let params = LiveParams {
                sessions,
                duration: Duration::from_millis(duration_ms),
                deletions_per_ms,
            };
            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(run_live(&params, config))?;
            report.print();
            let ok = report.is_consistent();
            verdict(ok, "all sessions received every deletion", "deliveries went missing");
            ok
        }
        Commands::Scenarios => run_scenarios()?,
        Commands::Config => {
            println!("{}", DeletionConfig::default().to_json_pretty()?);
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

//! Badge occupancy - per-zone occupancy from access-control badge reads
//!
//! Polls the access-control database for each configured zone, rebuilds
//! entry/exit sessions per identity and publishes a per-department occupancy
//! snapshot for every zone.
//!
//! Module structure:
//! - `domain/` - Core types (badge events, sessions, snapshots)
//! - `io/` - External interfaces (event store, snapshot files)
//! - `services/` - Pipeline (normalize, classify, replay, aggregate, schedule)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use badge_occupancy::infra::{Config, Metrics};
use badge_occupancy::io::{EventStore, MemoryStore, PgEventStore, SnapshotSink};
use badge_occupancy::services::scheduler::local_now;
use badge_occupancy::services::{IdentityDetailCache, SnapshotBoard, ZonePipeline, ZoneScheduler};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Badge occupancy - zone occupancy from badge reads
#[derive(Parser, Debug)]
#[command(name = "badge-occupancy", version, about)]
struct Args {
    /// Path to TOML configuration file (defaults to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single cycle for this zone, print the snapshot as JSON and exit
    #[arg(long, value_name = "ZONE")]
    once: Option<String>,

    /// Read events from a JSON fixture instead of the database
    #[arg(long, value_name = "PATH")]
    fixture: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-window fetch detail.
    // Logs go to stderr so `--once` output stays clean JSON.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "badge-occupancy starting");

    let config_path = args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);
    info!(
        config_file = %config.config_file(),
        database = %config.database_url().is_some(),
        page_size = %config.page_size(),
        order = %config.fetch_order().as_sql(),
        stuck_threshold_secs = %config.stuck_threshold_secs(),
        carry_over = %config.carry_over_enabled(),
        zones = ?config.zones().iter().map(|z| z.name.as_str()).collect::<Vec<_>>(),
        snapshot_dir = ?config.snapshot_dir(),
        "config_loaded"
    );

    let store: Arc<dyn EventStore> = match &args.fixture {
        Some(path) => Arc::new(MemoryStore::from_json_file(path)?),
        None => Arc::new(
            PgEventStore::connect_lazy(config.database_url())
                .context("Failed to set up the database pool")?,
        ),
    };

    let metrics = Arc::new(Metrics::new());
    let details = Arc::new(IdentityDetailCache::new(
        config.custom_attributes(),
        config.detail_cache_capacity(),
    ));

    if let Some(zone_name) = args.once {
        let zone = config
            .zone(&zone_name)
            .with_context(|| format!("Unknown zone '{zone_name}'"))?;
        let pipeline = ZonePipeline::new(zone, &config, store, details, metrics);
        let snapshot = pipeline.run_once(local_now()).await;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let board = SnapshotBoard::new();
    let sink = config.snapshot_dir().map(|dir| Arc::new(SnapshotSink::new(dir)));

    let mut handles = Vec::new();
    for zone in config.zones() {
        let pipeline =
            ZonePipeline::new(zone, &config, store.clone(), details.clone(), metrics.clone());
        let mut scheduler = ZoneScheduler::new(pipeline, zone, &config, &board, metrics.clone());
        if let Some(sink) = &sink {
            scheduler = scheduler.with_sink(sink.clone());
        }
        handles.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut metrics_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = metrics_shutdown.changed() => return,
                _ = interval.tick() => metrics_clone.report().log(),
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    for handle in handles {
        handle.await.ok();
    }

    metrics.report().log();
    info!("badge-occupancy shutdown complete");
    Ok(())
}

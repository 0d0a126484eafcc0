//! Periodic occupancy rollup for charting
//!
//! Replays badge reads for a date range through the same session automaton as
//! the live loop and prints day/week/month buckets per zone and department.
//!
//! Usage:
//!   badge-history --from 2024-01-01 --to 2024-01-31 --mode week

use anyhow::{bail, Context};
use badge_occupancy::domain::PeriodMode;
use badge_occupancy::infra::Config;
use badge_occupancy::io::{EventStore, MemoryStore, PgEventStore};
use badge_occupancy::services::periodic_history;
use chrono::NaiveDate;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "badge-history", version, about = "Periodic occupancy rollup as JSON")]
struct Args {
    /// Path to TOML configuration file (defaults to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// First day of the range (YYYY-MM-DD)
    #[arg(long)]
    from: NaiveDate,

    /// Last day of the range, inclusive (YYYY-MM-DD)
    #[arg(long)]
    to: NaiveDate,

    /// Bucket size: day, week or month
    #[arg(long, default_value = "day")]
    mode: PeriodMode,

    /// Read events from a JSON fixture instead of the database
    #[arg(long, value_name = "PATH")]
    fixture: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.from > args.to {
        bail!("--from {} is after --to {}", args.from, args.to);
    }

    let config_path = args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);
    let store: Arc<dyn EventStore> = match &args.fixture {
        Some(path) => Arc::new(MemoryStore::from_json_file(path)?),
        None => Arc::new(
            PgEventStore::connect_lazy(config.database_url())
                .context("Failed to set up the database pool")?,
        ),
    };

    let rollup = periodic_history(store, &config, args.from, args.to, args.mode).await;
    println!("{}", serde_json::to_string_pretty(&rollup)?);
    Ok(())
}

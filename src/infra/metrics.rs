//! Lock-free cycle metrics and periodic reporting
//!
//! Uses atomics for the per-cycle recording path. Reporting swaps the
//! "since last report" counters to zero; totals are monotonic.
//!
//! NOTE: All atomics use Relaxed ordering intentionally: these are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use crate::domain::snapshot::CycleDiagnostics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Cycle duration bucket boundaries (milliseconds)
/// Buckets: ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, ≤10000, ≤30000, ≤60000, >60000
const BUCKET_BOUNDS: [u64; 10] = [50, 100, 250, 500, 1000, 2500, 5000, 10_000, 30_000, 60_000];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(duration_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < duration_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [50, 100, 250, 500, 1000, 2500, 5000, 10_000, 30_000, 60_000, 120_000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector shared by all zone loops
pub struct Metrics {
    /// Completed cycles (monotonic)
    cycles_total: AtomicU64,
    /// Cycles that found the store unavailable (monotonic)
    cycles_offline: AtomicU64,
    /// Cycles abandoned on timeout (monotonic)
    cycles_timed_out: AtomicU64,
    /// Raw rows fetched (monotonic)
    events_fetched: AtomicU64,
    /// Rows dropped by validation (monotonic)
    events_dropped: AtomicU64,
    /// Rows dropped for an unknown device (monotonic)
    unknown_device_events: AtomicU64,
    /// Stuck sessions seen in the latest cycles (monotonic sum)
    stuck_sessions: AtomicU64,
    /// Snapshot sink write failures (monotonic)
    sink_failures: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    cycle_ms_sum: AtomicU64,
    cycle_ms_max: AtomicU64,
    cycle_ms_buckets: [AtomicU64; NUM_BUCKETS],
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_offline: AtomicU64::new(0),
            cycles_timed_out: AtomicU64::new(0),
            events_fetched: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            unknown_device_events: AtomicU64::new(0),
            stuck_sessions: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            cycle_ms_sum: AtomicU64::new(0),
            cycle_ms_max: AtomicU64::new(0),
            cycle_ms_buckets: Default::default(),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed cycle and its diagnostics
    pub fn record_cycle(
        &self,
        diagnostics: &CycleDiagnostics,
        unknown_events: usize,
        stuck: usize,
        duration_ms: u64,
    ) {
        let fetched = diagnostics.events_fetched + diagnostics.visitor_events;
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.events_fetched.fetch_add(fetched as u64, Ordering::Relaxed);
        self.events_dropped.fetch_add(diagnostics.events_dropped as u64, Ordering::Relaxed);
        self.unknown_device_events.fetch_add(unknown_events as u64, Ordering::Relaxed);
        self.stuck_sessions.fetch_add(stuck as u64, Ordering::Relaxed);

        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_ms_sum.fetch_add(duration_ms, Ordering::Relaxed);
        self.cycle_ms_buckets[bucket_index(duration_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.cycle_ms_max, duration_ms);
    }

    #[inline]
    pub fn record_offline(&self) {
        self.cycles_offline.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.cycles_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cycles_offline(&self) -> u64 {
        self.cycles_offline.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cycles_timed_out(&self) -> u64 {
        self.cycles_timed_out.load(Ordering::Relaxed)
    }

    /// Swap periodic counters and build a summary
    pub fn report(&self) -> MetricsSummary {
        let cycles = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let ms_sum = self.cycle_ms_sum.swap(0, Ordering::Relaxed);
        let ms_max = self.cycle_ms_max.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.cycle_ms_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        MetricsSummary {
            elapsed_secs: elapsed.as_secs(),
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_offline: self.cycles_offline.load(Ordering::Relaxed),
            cycles_timed_out: self.cycles_timed_out.load(Ordering::Relaxed),
            events_fetched: self.events_fetched.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            unknown_device_events: self.unknown_device_events.load(Ordering::Relaxed),
            stuck_sessions: self.stuck_sessions.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            cycles_since_report: cycles,
            avg_cycle_ms: if cycles > 0 { ms_sum / cycles } else { 0 },
            max_cycle_ms: ms_max,
            p95_cycle_ms: percentile_from_buckets(&buckets, 0.95),
        }
    }
}

/// Point-in-time metrics summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub elapsed_secs: u64,
    pub cycles_total: u64,
    pub cycles_offline: u64,
    pub cycles_timed_out: u64,
    pub events_fetched: u64,
    pub events_dropped: u64,
    pub unknown_device_events: u64,
    pub stuck_sessions: u64,
    pub sink_failures: u64,
    pub cycles_since_report: u64,
    pub avg_cycle_ms: u64,
    pub max_cycle_ms: u64,
    pub p95_cycle_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            cycles_total = %self.cycles_total,
            cycles = %self.cycles_since_report,
            offline = %self.cycles_offline,
            timeouts = %self.cycles_timed_out,
            events_fetched = %self.events_fetched,
            events_dropped = %self.events_dropped,
            unknown_device_events = %self.unknown_device_events,
            stuck_sessions = %self.stuck_sessions,
            sink_failures = %self.sink_failures,
            avg_cycle_ms = %self.avg_cycle_ms,
            max_cycle_ms = %self.max_cycle_ms,
            p95_cycle_ms = %self.p95_cycle_ms,
            "metrics"
        );
    }
}

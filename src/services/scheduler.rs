//! Per-zone poll loop and snapshot publication
//!
//! Each zone runs its own loop: run a cycle under a timeout, publish the
//! snapshot, sleep for the zone interval, repeat until shutdown. Offline and
//! timed-out cycles leave the previously published snapshot in place.
//!
//! Snapshots are published through a `watch` channel per zone (single writer,
//! whole-value replace). `SnapshotBoard` holds the receivers for readers.

use crate::domain::snapshot::ZoneSnapshot;
use crate::infra::config::{Config, ZoneConfig};
use crate::infra::metrics::Metrics;
use crate::io::snapshot_sink::SnapshotSink;
use crate::services::pipeline::{CycleOutcome, ZonePipeline};
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub type SnapshotSender = watch::Sender<Option<Arc<ZoneSnapshot>>>;
pub type SnapshotReceiver = watch::Receiver<Option<Arc<ZoneSnapshot>>>;

/// Local wall clock, the reference the badge store's timestamps are in
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Latest published snapshot per zone
#[derive(Default)]
pub struct SnapshotBoard {
    channels: RwLock<FxHashMap<String, SnapshotReceiver>>,
}

impl SnapshotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel for a zone, replacing any earlier one
    pub fn register(&self, zone: &str) -> SnapshotSender {
        let (tx, rx) = watch::channel(None);
        self.channels.write().insert(zone.to_string(), rx);
        tx
    }

    pub fn latest(&self, zone: &str) -> Option<Arc<ZoneSnapshot>> {
        self.channels.read().get(zone).and_then(|rx| rx.borrow().clone())
    }

    /// Latest snapshot, or an offline one when nothing was published yet
    pub fn view(&self, zone: &str, now: NaiveDateTime) -> ZoneSnapshot {
        self.latest(zone)
            .map(|snap| snap.as_ref().clone())
            .unwrap_or_else(|| ZoneSnapshot::offline(zone, now))
    }

    pub fn subscribe(&self, zone: &str) -> Option<SnapshotReceiver> {
        self.channels.read().get(zone).cloned()
    }

    pub fn zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = self.channels.read().keys().cloned().collect();
        zones.sort();
        zones
    }
}

/// Poll loop for one zone
pub struct ZoneScheduler {
    pipeline: ZonePipeline,
    interval: Duration,
    cycle_timeout: Duration,
    publisher: SnapshotSender,
    sink: Option<Arc<SnapshotSink>>,
    metrics: Arc<Metrics>,
    clock: fn() -> NaiveDateTime,
}

impl ZoneScheduler {
    pub fn new(
        pipeline: ZonePipeline,
        zone: &ZoneConfig,
        config: &Config,
        board: &SnapshotBoard,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            publisher: board.register(pipeline.zone()),
            pipeline,
            interval: Duration::from_secs(zone.interval_secs.max(1)),
            cycle_timeout: Duration::from_secs(config.cycle_timeout_secs().max(1)),
            sink: None,
            metrics,
            clock: local_now,
        }
    }

    pub fn with_sink(mut self, sink: Arc<SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    /// Run one cycle under the timeout and publish its snapshot
    ///
    /// Returns true when a new snapshot was published.
    pub async fn tick(&self) -> bool {
        let zone = self.pipeline.zone();
        let now = (self.clock)();

        match tokio::time::timeout(self.cycle_timeout, self.pipeline.run_cycle(now)).await {
            Ok(CycleOutcome::Published(snapshot)) => {
                self.publish(snapshot).await;
                true
            }
            Ok(CycleOutcome::Offline) => {
                debug!(zone = %zone, "snapshot_kept");
                false
            }
            Err(_) => {
                warn!(
                    zone = %zone,
                    timeout_ms = %self.cycle_timeout.as_millis(),
                    "zone_cycle_timed_out"
                );
                self.metrics.record_timeout();
                false
            }
        }
    }

    async fn publish(&self, snapshot: ZoneSnapshot) {
        let snapshot = Arc::new(snapshot);
        if let Some(sink) = &self.sink {
            if !sink.clone().persist(snapshot.clone()).await {
                self.metrics.record_sink_failure();
            }
        }
        debug!(zone = %snapshot.zone, cycle_id = %snapshot.cycle_id, "zone_cycle_published");
        self.publisher.send_replace(Some(snapshot));
    }

    /// Run until shutdown; a zone without entry or exit devices never starts
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let zone = self.pipeline.zone().to_string();
        if !self.pipeline.is_configured() {
            warn!(zone = %zone, "zone_not_configured");
            return;
        }
        info!(
            zone = %zone,
            interval_secs = %self.interval.as_secs(),
            cycle_timeout_secs = %self.cycle_timeout.as_secs(),
            "zone_scheduler_started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(zone = %zone, "zone_scheduler_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EventTime, RawEvent, TIME_FORMAT};
    use crate::io::memory::MemoryStore;
    use crate::services::detail_cache::IdentityDetailCache;

    fn fixed_now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-01-02 10:00:00", TIME_FORMAT).unwrap()
    }

    fn zone() -> ZoneConfig {
        ZoneConfig {
            in_devices: vec!["GATE-IN".into()],
            out_devices: vec!["GATE-OUT".into()],
            ..ZoneConfig::new("hijau")
        }
    }

    fn scheduler(store: Arc<MemoryStore>, zone: &ZoneConfig, board: &SnapshotBoard) -> ZoneScheduler {
        let config = Config::default();
        let metrics = Arc::new(Metrics::new());
        let pipeline = ZonePipeline::new(
            zone,
            &config,
            store,
            Arc::new(IdentityDetailCache::new(&[], 16)),
            metrics.clone(),
        );
        ZoneScheduler::new(pipeline, zone, &config, board, metrics).with_clock(fixed_now)
    }

    #[tokio::test]
    async fn test_tick_publishes_and_offline_keeps_previous() {
        let store = Arc::new(MemoryStore::default());
        store.push_badge_event(RawEvent {
            identity_id: "P1".into(),
            department_name: "OPS".into(),
            device_alias: "GATE-IN".into(),
            event_time: EventTime::Text("2024-01-02 08:00:00".into()),
            ..Default::default()
        });
        let board = SnapshotBoard::new();
        let scheduler = scheduler(store.clone(), &zone(), &board);

        assert!(board.latest("hijau").is_none());
        assert!(board.view("hijau", fixed_now()).offline);

        assert!(scheduler.tick().await);
        let first = board.latest("hijau").unwrap();
        assert_eq!(first.total_current, 1);

        store.set_offline(true);
        assert!(!scheduler.tick().await);
        let kept = board.latest("hijau").unwrap();
        assert_eq!(kept.cycle_id, first.cycle_id);
    }

    #[tokio::test]
    async fn test_unconfigured_zone_never_starts() {
        let store = Arc::new(MemoryStore::default());
        let board = SnapshotBoard::new();
        let scheduler = scheduler(store.clone(), &ZoneConfig::new("merah"), &board);
        let (_tx, rx) = watch::channel(false);

        scheduler.run(rx).await;
        assert_eq!(store.calls.badge_pages.load(std::sync::atomic::Ordering::Relaxed), 0);
        assert!(board.latest("merah").is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::default());
        let board = SnapshotBoard::new();
        let scheduler =
            scheduler(store, &zone(), &board).with_interval(Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(rx));
        let mut updates = board.subscribe("hijau").unwrap();
        updates.changed().await.unwrap();
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(board.latest("hijau").is_some());
    }
}

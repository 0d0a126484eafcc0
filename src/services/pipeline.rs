//! One zone's aggregation cycle: fetch, normalize, classify, replay, enrich,
//! aggregate
//!
//! A cycle either produces a complete snapshot or reports the store as
//! offline; there is no partial result. Per-cycle counters live in a
//! `CycleStats` created at the start of every cycle.

use crate::domain::session::PersonSession;
use crate::domain::snapshot::{CycleDiagnostics, PeriodMode, PeriodicRollup, PersonDetail, ZoneSnapshot};
use crate::domain::types::{ClassifiedEvent, Origin, RawEvent};
use crate::infra::config::{Config, FetchOrder, ZoneConfig};
use crate::infra::metrics::Metrics;
use crate::io::store::{EventStore, TimeWindow};
use crate::services::aggregator::{live_rollup, periodic_rollup, SnapshotMeta};
use crate::services::classifier::DeviceClassifier;
use crate::services::detail_cache::IdentityDetailCache;
use crate::services::enrichment::enrich_visitors;
use crate::services::normalizer::EventNormalizer;
use crate::services::session_machine::{CarryOverBand, MachineMode, SessionMachine};
use crate::services::source::{day_window, EventSource};
use chrono::{NaiveDate, NaiveDateTime};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counters for a single cycle
#[derive(Debug, Default)]
pub struct CycleStats {
    pub events_fetched: usize,
    pub visitor_events: usize,
    pub events_dropped: usize,
    pub event_point_resolved: usize,
    pub unknown_device_events: usize,
    pub unknown_devices: BTreeSet<String>,
}

impl CycleStats {
    fn into_diagnostics(self, sessions: usize) -> CycleDiagnostics {
        CycleDiagnostics {
            events_fetched: self.events_fetched,
            visitor_events: self.visitor_events,
            events_dropped: self.events_dropped,
            event_point_resolved: self.event_point_resolved,
            sessions,
            unknown_devices: self.unknown_devices.into_iter().collect(),
        }
    }
}

/// Normalize and classify raw rows, keeping fetch order
///
/// Rows that fail validation or hit an unknown device are counted in `stats`
/// and dropped. `seq_offset` continues numbering across lists.
pub fn classify_events(
    normalizer: &EventNormalizer,
    classifier: &DeviceClassifier,
    raws: &[RawEvent],
    seq_offset: usize,
    stats: &mut CycleStats,
) -> Vec<ClassifiedEvent> {
    let mut out = Vec::with_capacity(raws.len());
    for (i, raw) in raws.iter().enumerate() {
        let Some(event) = normalizer.normalize(raw) else {
            stats.events_dropped += 1;
            continue;
        };

        let classification = classifier.classify_event(&event);
        if classification.device.is_empty() {
            stats.events_dropped += 1;
            continue;
        }
        let Some(direction) = classification.role.direction() else {
            stats.unknown_device_events += 1;
            stats.unknown_devices.insert(classification.device);
            continue;
        };
        if classification.via_event_point {
            stats.event_point_resolved += 1;
        }

        out.push(ClassifiedEvent::from_normalized(
            event,
            classification.device,
            direction,
            seq_offset + i,
        ));
    }
    out
}

/// Outcome of one cycle
#[derive(Debug)]
pub enum CycleOutcome {
    Published(ZoneSnapshot),
    Offline,
}

/// Aggregation pipeline for one zone
pub struct ZonePipeline {
    zone: String,
    store: Arc<dyn EventStore>,
    classifier: DeviceClassifier,
    normalizer: EventNormalizer,
    details: Arc<IdentityDetailCache>,
    metrics: Arc<Metrics>,
    page_size: u32,
    order: FetchOrder,
    stuck_threshold_secs: u64,
    carry_over: Option<CarryOverBand>,
}

impl ZonePipeline {
    pub fn new(
        zone: &ZoneConfig,
        config: &Config,
        store: Arc<dyn EventStore>,
        details: Arc<IdentityDetailCache>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let carry_over = config.carry_over_enabled().then(|| {
            let (evening_start, morning_end) = config.carry_over_band();
            CarryOverBand { evening_start, morning_end }
        });

        Self {
            zone: zone.name.clone(),
            store,
            classifier: DeviceClassifier::new(&zone.in_devices, &zone.out_devices),
            normalizer: EventNormalizer::new(config.parse_mode(), config.visitor_department()),
            details,
            metrics,
            page_size: config.page_size(),
            order: config.fetch_order(),
            stuck_threshold_secs: config.stuck_threshold_secs(),
            carry_over,
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// False when the zone lacks entry or exit devices
    pub fn is_configured(&self) -> bool {
        self.classifier.is_configured()
    }

    /// Run one cycle at reference time `now` (local wall clock)
    pub async fn run_cycle(&self, now: NaiveDateTime) -> CycleOutcome {
        let started = Instant::now();
        let cycle_id = Uuid::now_v7().to_string();
        let today = now.date();
        let source = EventSource::new(self.store.clone(), self.page_size);

        let employee_fetch = async {
            match self.carry_over {
                Some(_) => source.fetch_split(today, self.order).await,
                None => source.fetch_combined(today, self.order).await.map(|ev| (Vec::new(), ev)),
            }
        };
        let (employees, visitors) = tokio::join!(employee_fetch, source.fetch_visitors(today));

        let (previous_raw, current_raw) = match employees {
            Ok(fetched) if !source.is_offline() => fetched,
            _ => {
                warn!(zone = %self.zone, cycle_id = %cycle_id, "zone_cycle_offline");
                self.metrics.record_offline();
                return CycleOutcome::Offline;
            }
        };

        let mut stats = CycleStats {
            events_fetched: previous_raw.len() + current_raw.len(),
            visitor_events: visitors.len(),
            ..Default::default()
        };
        let previous =
            classify_events(&self.normalizer, &self.classifier, &previous_raw, 0, &mut stats);
        let mut current =
            classify_events(&self.normalizer, &self.classifier, &current_raw, 0, &mut stats);
        current.extend(classify_events(
            &self.normalizer,
            &self.classifier,
            &visitors,
            current_raw.len(),
            &mut stats,
        ));

        let mut machine = SessionMachine::new(MachineMode::live(now, self.stuck_threshold_secs));
        if let Some(band) = self.carry_over {
            machine = machine.with_band(band);
        }
        let mut sessions = machine.build(current, &previous);

        enrich_visitors(self.store.as_ref(), &mut sessions, today).await;
        let details = self.resolve_details(&sessions).await;

        let stuck = sessions.iter().filter(|s| s.possibly_stuck).count();
        for session in sessions.iter().filter(|s| s.possibly_stuck) {
            warn!(
                zone = %self.zone,
                identity = %session.identity_id,
                last_transition = %session.last_transition_time,
                "session_possibly_stuck"
            );
        }
        if !stats.unknown_devices.is_empty() {
            warn!(zone = %self.zone, devices = ?stats.unknown_devices, "unknown_devices");
        }

        let unknown_events = stats.unknown_device_events;
        let meta = SnapshotMeta {
            zone: self.zone.clone(),
            generated_at: now,
            cycle_id,
            diagnostics: stats.into_diagnostics(sessions.len()),
        };
        let snapshot = live_rollup(meta, &sessions, &details);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_cycle(&snapshot.diagnostics, unknown_events, stuck, elapsed_ms);
        info!(
            zone = %self.zone,
            cycle_id = %snapshot.cycle_id,
            total_in = %snapshot.total_in,
            total_out = %snapshot.total_out,
            total_current = %snapshot.total_current,
            sessions = %snapshot.diagnostics.sessions,
            dropped = %snapshot.diagnostics.events_dropped,
            stuck = %stuck,
            elapsed_ms = %elapsed_ms,
            "zone_cycle_completed"
        );
        CycleOutcome::Published(snapshot)
    }

    /// Run one cycle and always return a snapshot (offline when unavailable)
    pub async fn run_once(&self, now: NaiveDateTime) -> ZoneSnapshot {
        if !self.is_configured() {
            warn!(zone = %self.zone, "zone_not_configured");
            return ZoneSnapshot::offline(&self.zone, now);
        }
        match self.run_cycle(now).await {
            CycleOutcome::Published(snapshot) => snapshot,
            CycleOutcome::Offline => ZoneSnapshot::offline(&self.zone, now),
        }
    }

    /// Employee details for sessions currently inside
    async fn resolve_details(&self, sessions: &[PersonSession]) -> FxHashMap<String, PersonDetail> {
        let mut details = FxHashMap::default();
        for session in sessions.iter().filter(|s| s.is_inside() && s.origin == Origin::Employee) {
            let detail = self.details.get_detail(self.store.as_ref(), session).await;
            details.insert(session.identity_id.clone(), detail);
        }
        details
    }
}

/// Periodic rollup over every configured zone for `[from, to]` (whole days)
///
/// Reads start one day before `from` so sessions that opened the evening
/// before have their state; only transitions inside the range are counted.
/// A store failure yields an empty rollup marked offline.
pub async fn periodic_history(
    store: Arc<dyn EventStore>,
    config: &Config,
    from: NaiveDate,
    to: NaiveDate,
    mode: PeriodMode,
) -> PeriodicRollup {
    let zone_configs: Vec<&ZoneConfig> =
        config.zones().iter().filter(|z| z.is_configured()).collect();
    let zone_names: Vec<String> = zone_configs.iter().map(|z| z.name.clone()).collect();
    if from > to {
        return PeriodicRollup::empty(mode, zone_names, false);
    }

    let range = TimeWindow::new(day_window(from).start, day_window(to).end);
    let fetch_window =
        TimeWindow::new(day_window(from.pred_opt().unwrap_or(from)).start, range.end);
    let source = EventSource::new(store, config.page_size());
    let raws = match source.fetch_window(fetch_window, FetchOrder::Asc).await {
        Ok(raws) => raws,
        Err(e) => {
            warn!(from = %from, to = %to, error = %e, "history_offline");
            return PeriodicRollup::empty(mode, zone_names, true);
        }
    };

    let normalizer = EventNormalizer::new(config.parse_mode(), config.visitor_department());
    let machine = SessionMachine::new(MachineMode::Historical);
    let zones: Vec<(String, Vec<PersonSession>)> = zone_configs
        .iter()
        .map(|zone| {
            let classifier = DeviceClassifier::new(&zone.in_devices, &zone.out_devices);
            let mut stats = CycleStats::default();
            let events = classify_events(&normalizer, &classifier, &raws, 0, &mut stats);
            debug!(
                zone = %zone.name,
                events = %events.len(),
                dropped = %stats.events_dropped,
                unknown = %stats.unknown_device_events,
                "history_zone_classified"
            );
            (zone.name.clone(), machine.build(events, &[]))
        })
        .collect();

    let rollup = periodic_rollup(mode, range, &zones);
    info!(
        from = %from,
        to = %to,
        mode = %mode.as_str(),
        periods = %rollup.periods.len(),
        departments = %rollup.departments.len(),
        "history_built"
    );
    rollup
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EventTime, TIME_FORMAT};
    use crate::io::memory::MemoryStore;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIME_FORMAT).unwrap()
    }

    fn raw(id: &str, device: &str, time: &str) -> RawEvent {
        RawEvent {
            identity_id: id.to_string(),
            display_name: format!("name-{id}"),
            department_name: "OPS".to_string(),
            device_alias: device.to_string(),
            event_time: EventTime::Text(time.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_events_counts_drops_and_unknowns() {
        let normalizer = EventNormalizer::new(Default::default(), "TAMU");
        let classifier = DeviceClassifier::new(&["GATE-IN"], &["GATE-OUT"]);
        let raws = vec![
            raw("P1", "GATE-IN", "2024-01-02 08:00:00"),
            raw("", "GATE-IN", "2024-01-02 08:00:00"),
            raw("P2", "LOBBY", "2024-01-02 08:00:00"),
            raw("P3", "GATE-OUT", "not a time"),
        ];
        let mut stats = CycleStats::default();
        let events = classify_events(&normalizer, &classifier, &raws, 10, &mut stats);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 10);
        assert_eq!(stats.events_dropped, 2);
        assert_eq!(stats.unknown_device_events, 1);
        assert!(stats.unknown_devices.contains("LOBBY"));
    }

    #[test]
    fn test_blank_alias_with_unmatched_point_is_dropped() {
        let normalizer = EventNormalizer::new(Default::default(), "TAMU");
        let classifier = DeviceClassifier::new(&["GATE-IN"], &["GATE-OUT"]);
        let mut row = raw("P1", "", "2024-01-02 08:00:00");
        row.event_point_name = "LOBBY".to_string();
        let mut stats = CycleStats::default();
        let events = classify_events(&normalizer, &classifier, &[row], 0, &mut stats);

        assert!(events.is_empty());
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(stats.unknown_device_events, 0);
        assert!(stats.unknown_devices.is_empty());
    }

    #[tokio::test]
    async fn test_run_once_unconfigured_zone_skips_store() {
        let store = Arc::new(MemoryStore::default());
        let config = Config::default();
        let pipeline = ZonePipeline::new(
            &ZoneConfig::new("merah"),
            &config,
            store.clone(),
            Arc::new(IdentityDetailCache::new(&[], 16)),
            Arc::new(Metrics::new()),
        );

        let snap = pipeline.run_once(at("2024-01-02 10:00:00")).await;
        assert!(snap.offline);
        assert_eq!(snap.zone, "merah");
        assert_eq!(store.calls.badge_pages.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_history_counts_logical_transitions_per_zone() {
        let store = Arc::new(MemoryStore::default());
        store.push_badge_event(raw("P1", "GATE-IN", "2024-01-02 08:00:00"));
        store.push_badge_event(raw("P1", "GATE-IN", "2024-01-02 08:05:00"));
        store.push_badge_event(raw("P1", "GATE-OUT", "2024-01-02 17:00:00"));
        store.push_badge_event(raw("P2", "RED-IN", "2024-01-03 09:00:00"));
        let config = Config::default().with_zones(vec![
            ZoneConfig {
                in_devices: vec!["GATE-IN".into()],
                out_devices: vec!["GATE-OUT".into()],
                ..ZoneConfig::new("hijau")
            },
            ZoneConfig {
                in_devices: vec!["RED-IN".into()],
                out_devices: vec!["RED-OUT".into()],
                ..ZoneConfig::new("merah")
            },
        ]);

        let from = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let rollup = periodic_history(store, &config, from, to, PeriodMode::Day).await;

        assert!(!rollup.offline);
        assert_eq!(rollup.labels(), vec!["2024-01-02", "2024-01-03"]);
        let day1 = rollup.period("2024-01-02", "hijau").unwrap();
        assert_eq!((day1.in_count, day1.out_count, day1.current), (1, 1, 0));
        let day2 = rollup.period("2024-01-03", "merah").unwrap();
        assert_eq!((day2.in_count, day2.current), (1, 1));
    }

    #[tokio::test]
    async fn test_history_offline() {
        let store = Arc::new(MemoryStore::default());
        store.set_offline(true);
        let config = Config::default().with_zones(vec![ZoneConfig {
            in_devices: vec!["GATE-IN".into()],
            out_devices: vec!["GATE-OUT".into()],
            ..ZoneConfig::new("hijau")
        }]);
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let rollup = periodic_history(store, &config, day, day, PeriodMode::Day).await;
        assert!(rollup.offline);
        assert!(rollup.periods.is_empty());
        assert_eq!(rollup.zones, vec!["hijau".to_string()]);
    }

    #[tokio::test]
    async fn test_run_once_offline_snapshot() {
        let store = Arc::new(MemoryStore::default());
        store.set_offline(true);
        let config = Config::default();
        let zone = ZoneConfig {
            in_devices: vec!["GATE-IN".into()],
            out_devices: vec!["GATE-OUT".into()],
            ..ZoneConfig::new("hijau")
        };
        let metrics = Arc::new(Metrics::new());
        let pipeline = ZonePipeline::new(
            &zone,
            &config,
            store,
            Arc::new(IdentityDetailCache::new(&[], 16)),
            metrics.clone(),
        );

        let snap = pipeline.run_once(at("2024-01-02 10:00:00")).await;
        assert!(snap.offline);
        assert_eq!(snap.zone, "hijau");
        assert_eq!(metrics.cycles_offline(), 1);
    }
}

//! In-memory `EventStore` for dry runs and tests
//!
//! Loads a JSON fixture with the same shape as the database tables and
//! answers queries with the same window/order/pagination semantics.
//! `set_offline(true)` makes every call fail like an unreachable database.

use crate::domain::types::{PersonRecord, RawEvent, VisitorMeta};
use crate::infra::config::FetchOrder;
use crate::io::store::{AttributeSlot, EventStore, StoreError, TimeWindow};
use crate::services::normalizer::sort_time;
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Fixture file layout
#[derive(Debug, Default, Deserialize)]
pub struct StoreFixture {
    #[serde(default)]
    pub badge_events: Vec<RawEvent>,
    #[serde(default)]
    pub visitor_events: Vec<RawEvent>,
    #[serde(default)]
    pub visits: Vec<VisitorMeta>,
    #[serde(default)]
    pub persons: Vec<PersonRecord>,
    /// person_id -> plate
    #[serde(default)]
    pub plates: HashMap<String, String>,
    /// attribute name -> extension row slot
    #[serde(default)]
    pub attribute_slots: HashMap<String, usize>,
    /// person_id -> extension row
    #[serde(default)]
    pub attribute_rows: HashMap<String, Vec<Option<String>>>,
}

/// Counters for store calls, used to check lookup behavior
#[derive(Debug, Default)]
pub struct CallCounts {
    pub badge_pages: AtomicU64,
    pub visitor_fetches: AtomicU64,
    pub person_lookups: AtomicU64,
    pub slot_lookups: AtomicU64,
}

impl CallCounts {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<StoreFixture>,
    offline: AtomicBool,
    visitors_offline: AtomicBool,
    pub calls: CallCounts,
}

fn in_window(events: &[RawEvent], window: TimeWindow) -> Vec<(NaiveDateTime, RawEvent)> {
    events
        .iter()
        .filter_map(|ev| sort_time(&ev.event_time).map(|t| (t, ev.clone())))
        .filter(|(t, _)| window.contains(*t))
        .collect()
}

impl MemoryStore {
    pub fn new(fixture: StoreFixture) -> Self {
        Self { data: RwLock::new(fixture), ..Default::default() }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        let fixture: StoreFixture = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture {}", path.display()))?;
        Ok(Self::new(fixture))
    }

    /// Make every call fail
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Make only visitor queries fail
    pub fn set_visitors_offline(&self, offline: bool) {
        self.visitors_offline.store(offline, Ordering::Relaxed);
    }

    pub fn push_badge_event(&self, event: RawEvent) {
        self.data.write().badge_events.push(event);
    }

    pub fn push_visitor_event(&self, event: RawEvent) {
        self.data.write().visitor_events.push(event);
    }

    pub fn push_visit(&self, visit: VisitorMeta) {
        self.data.write().visits.push(visit);
    }

    pub fn push_person(&self, person: PersonRecord) {
        self.data.write().persons.push(person);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn check_visitors(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.visitors_offline.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("visitor tables offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn fetch_badge_page(
        &self,
        window: TimeWindow,
        order: FetchOrder,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<RawEvent>, StoreError> {
        self.calls.badge_pages.fetch_add(1, Ordering::Relaxed);
        self.check()?;

        let mut rows = in_window(&self.data.read().badge_events, window);
        match order {
            FetchOrder::Asc => rows.sort_by_key(|(t, _)| *t),
            FetchOrder::Desc => rows.sort_by(|a, b| b.0.cmp(&a.0)),
        }
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit as usize).map(|(_, ev)| ev).collect())
    }

    async fn fetch_visitor_events(&self, window: TimeWindow) -> Result<Vec<RawEvent>, StoreError> {
        self.calls.visitor_fetches.fetch_add(1, Ordering::Relaxed);
        self.check_visitors()?;
        Ok(in_window(&self.data.read().visitor_events, window).into_iter().map(|(_, ev)| ev).collect())
    }

    async fn fetch_visit_meta(
        &self,
        identities: &[String],
        _window: TimeWindow,
    ) -> Result<Vec<VisitorMeta>, StoreError> {
        self.check_visitors()?;
        Ok(self
            .data
            .read()
            .visits
            .iter()
            .filter(|v| identities.contains(&v.identity_id))
            .cloned()
            .collect())
    }

    async fn fetch_person(&self, identity_id: &str) -> Result<Option<PersonRecord>, StoreError> {
        self.calls.person_lookups.fetch_add(1, Ordering::Relaxed);
        self.check()?;
        Ok(self.data.read().persons.iter().find(|p| p.identity_id == identity_id).cloned())
    }

    async fn fetch_plate(&self, person_id: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.data.read().plates.get(person_id).cloned())
    }

    async fn fetch_attribute_slots(
        &self,
        names: &[String],
    ) -> Result<Vec<AttributeSlot>, StoreError> {
        self.calls.slot_lookups.fetch_add(1, Ordering::Relaxed);
        self.check()?;
        let data = self.data.read();
        let mut slots: Vec<AttributeSlot> = data
            .attribute_slots
            .iter()
            .filter(|(name, _)| names.contains(&name.to_lowercase()))
            .map(|(name, &index)| AttributeSlot { name: name.to_lowercase(), index })
            .collect();
        slots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(slots)
    }

    async fn fetch_attribute_row(
        &self,
        person_id: &str,
    ) -> Result<Option<Vec<Option<String>>>, StoreError> {
        self.check()?;
        Ok(self.data.read().attribute_rows.get(person_id).cloned())
    }
}

//! Event source adapter: windowed, paginated reads from the `EventStore`
//!
//! Fetches are grouped per cycle. A fresh `EventSource` is created for every
//! cycle, so the `offline` flag never leaks from one cycle into the next.

use crate::domain::types::RawEvent;
use crate::infra::config::FetchOrder;
use crate::io::store::{EventStore, StoreError, TimeWindow};
use crate::services::normalizer::sort_time;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Safety cap on pages per window
const MAX_PAGES: u64 = 10_000;

/// Inclusive window covering one calendar day
///
/// Ends one microsecond before the next midnight so adjacent days never
/// return the same read twice under `BETWEEN`.
pub fn day_window(date: NaiveDate) -> TimeWindow {
    let start = date.and_time(chrono::NaiveTime::MIN);
    TimeWindow::new(start, start + TimeDelta::days(1) - TimeDelta::microseconds(1))
}

/// Stable sort of raw rows by event time in the requested order
///
/// Rows with an unusable time keep their relative position at the start
/// (ascending) or end (descending); the normalizer drops them later.
pub fn sort_events(events: &mut [RawEvent], order: FetchOrder) {
    let key = |ev: &RawEvent| -> Option<NaiveDateTime> { sort_time(&ev.event_time) };
    match order {
        FetchOrder::Asc => events.sort_by_key(key),
        FetchOrder::Desc => events.sort_by(|a, b| key(b).cmp(&key(a))),
    }
}

pub struct EventSource {
    store: Arc<dyn EventStore>,
    page_size: u32,
    offline: AtomicBool,
}

impl EventSource {
    pub fn new(store: Arc<dyn EventStore>, page_size: u32) -> Self {
        Self { store, page_size: page_size.max(1), offline: AtomicBool::new(false) }
    }

    /// True once any employee-event fetch in this cycle has failed
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    fn mark_offline(&self, error: &StoreError) {
        self.offline.store(true, Ordering::Relaxed);
        warn!(error = %error, "store_offline");
    }

    /// All badge reads in the window, page by page until an empty page
    pub async fn fetch_window(
        &self,
        window: TimeWindow,
        order: FetchOrder,
    ) -> Result<Vec<RawEvent>, StoreError> {
        let mut events = Vec::new();
        let mut offset: u64 = 0;

        for _ in 0..MAX_PAGES {
            let page = match self.store.fetch_badge_page(window, order, offset, self.page_size).await
            {
                Ok(page) => page,
                Err(e) => {
                    self.mark_offline(&e);
                    return Err(e);
                }
            };
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;
            events.extend(page);
        }

        debug!(
            start = %window.start,
            end = %window.end,
            events = %events.len(),
            "window_fetched"
        );
        Ok(events)
    }

    /// Yesterday's and today's windows, fetched separately as (previous, current)
    pub async fn fetch_split(
        &self,
        today: NaiveDate,
        order: FetchOrder,
    ) -> Result<(Vec<RawEvent>, Vec<RawEvent>), StoreError> {
        let yesterday = today.pred_opt().unwrap_or(today);
        let previous = self.fetch_window(day_window(yesterday), order).await?;
        let current = self.fetch_window(day_window(today), order).await?;
        Ok((previous, current))
    }

    /// Yesterday's and today's windows concatenated and re-sorted
    pub async fn fetch_combined(
        &self,
        today: NaiveDate,
        order: FetchOrder,
    ) -> Result<Vec<RawEvent>, StoreError> {
        let (mut events, current) = self.fetch_split(today, order).await?;
        events.extend(current);
        sort_events(&mut events, order);
        Ok(events)
    }

    /// Today's visitor reads; a failure degrades to an empty list
    pub async fn fetch_visitors(&self, today: NaiveDate) -> Vec<RawEvent> {
        match self.store.fetch_visitor_events(day_window(today)).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "visitor_fetch_failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EventTime, Origin, TIME_FORMAT};
    use crate::io::memory::{CallCounts, MemoryStore};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIME_FORMAT).unwrap()
    }

    fn badge(id: &str, time: &str) -> RawEvent {
        RawEvent {
            identity_id: id.to_string(),
            device_alias: "GATE-A".to_string(),
            event_time: EventTime::Text(time.to_string()),
            ..Default::default()
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[test]
    fn test_day_window_bounds() {
        let w = day_window(today());
        assert!(w.contains(at("2024-01-02 00:00:00")));
        assert!(w.contains(at("2024-01-02 23:59:59")));
        assert!(!w.contains(at("2024-01-03 00:00:00")));
    }

    #[tokio::test]
    async fn test_fetch_window_paginates_until_empty() {
        let store = Arc::new(MemoryStore::default());
        for i in 0..5 {
            store.push_badge_event(badge(&format!("P{i}"), &format!("2024-01-02 0{i}:00:00")));
        }
        let source = EventSource::new(store.clone(), 2);

        let events = source.fetch_window(day_window(today()), FetchOrder::Asc).await.unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["P0", "P1", "P2", "P3", "P4"]);
        // 2 + 2 + 1 + empty page
        assert_eq!(CallCounts::get(&store.calls.badge_pages), 4);
    }

    #[tokio::test]
    async fn test_fetch_combined_spans_two_days_sorted() {
        let store = Arc::new(MemoryStore::default());
        store.push_badge_event(badge("P1", "2024-01-02 08:00:00"));
        store.push_badge_event(badge("P2", "2024-01-01 23:50:00"));
        store.push_badge_event(badge("P3", "2023-12-31 23:50:00"));
        let source = EventSource::new(store, 800);

        let events = source.fetch_combined(today(), FetchOrder::Desc).await.unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2"]);

        let (previous, current) = source.fetch_split(today(), FetchOrder::Asc).await.unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].identity_id, "P2");
        assert_eq!(current[0].identity_id, "P1");
    }

    #[tokio::test]
    async fn test_employee_failure_flips_offline() {
        let store = Arc::new(MemoryStore::default());
        store.set_offline(true);
        let source = EventSource::new(store, 800);

        assert!(source.fetch_combined(today(), FetchOrder::Desc).await.is_err());
        assert!(source.is_offline());
    }

    #[tokio::test]
    async fn test_visitor_failure_degrades_to_empty() {
        let store = Arc::new(MemoryStore::default());
        store.push_visitor_event(RawEvent {
            origin: Origin::Visitor,
            ..badge("V1", "2024-01-02 09:00:00")
        });
        store.set_visitors_offline(true);
        let source = EventSource::new(store, 800);

        assert!(source.fetch_visitors(today()).await.is_empty());
        assert!(!source.is_offline());
    }

    #[test]
    fn test_sort_events_is_stable() {
        let mut events = vec![
            badge("A", "2024-01-02 08:00:00"),
            badge("B", "2024-01-02 09:00:00"),
            badge("C", "2024-01-02 08:00:00"),
        ];
        sort_events(&mut events, FetchOrder::Asc);
        let ids: Vec<&str> = events.iter().map(|e| e.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
    }
}

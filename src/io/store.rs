//! Read-only access to the access-control database
//!
//! `EventStore` is the seam between the pipeline and the relational store.
//! Every call is idempotent and read-only; the pipeline decides how failures
//! degrade (offline cycle, empty visitor list, fallback detail).

use crate::domain::types::{PersonRecord, RawEvent, VisitorMeta};
use crate::infra::config::FetchOrder;
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// Store failure, always treated as "store unavailable" by callers
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database url not configured")]
    NotConfigured,
    #[error("query {query} failed: {source}")]
    Query {
        query: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn query(query: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError::Query { query, source }
    }
}

/// Inclusive time window `[start, end]`, matching the `BETWEEN` badge queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, time: NaiveDateTime) -> bool {
        time >= self.start && time <= self.end
    }
}

/// Attribute name resolved to its slot in the personnel extension row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSlot {
    pub name: String,
    pub index: usize,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// One page of employee badge reads within the window
    async fn fetch_badge_page(
        &self,
        window: TimeWindow,
        order: FetchOrder,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<RawEvent>, StoreError>;

    /// Visitor badge reads within the window
    async fn fetch_visitor_events(&self, window: TimeWindow) -> Result<Vec<RawEvent>, StoreError>;

    /// Visit metadata for the given visitor identities, updated within the window
    async fn fetch_visit_meta(
        &self,
        identities: &[String],
        window: TimeWindow,
    ) -> Result<Vec<VisitorMeta>, StoreError>;

    async fn fetch_person(&self, identity_id: &str) -> Result<Option<PersonRecord>, StoreError>;

    async fn fetch_plate(&self, person_id: &str) -> Result<Option<String>, StoreError>;

    /// Resolve attribute names (lowercase) to extension-row slots
    async fn fetch_attribute_slots(&self, names: &[String])
        -> Result<Vec<AttributeSlot>, StoreError>;

    /// The person's extension row, one entry per column (`None` for NULL)
    async fn fetch_attribute_row(
        &self,
        person_id: &str,
    ) -> Result<Option<Vec<Option<String>>>, StoreError>;
}

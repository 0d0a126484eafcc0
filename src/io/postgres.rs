//! PostgreSQL `EventStore` backed by an sqlx connection pool
//!
//! The pool connects lazily, so a database that is down at startup only
//! shows up as offline cycles, never as a startup failure.

use crate::domain::types::{EventTime, Origin, PersonRecord, RawEvent, VisitorMeta};
use crate::infra::config::FetchOrder;
use crate::io::store::{AttributeSlot, EventStore, StoreError, TimeWindow};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::debug;

const BADGE_PAGE_ASC: &str = "SELECT pin, name, dept_name, dev_alias, event_point_name, event_time \
     FROM acc_transaction WHERE event_time BETWEEN $1 AND $2 \
     ORDER BY event_time ASC OFFSET $3 LIMIT $4";

const BADGE_PAGE_DESC: &str = "SELECT pin, name, dept_name, dev_alias, event_point_name, event_time \
     FROM acc_transaction WHERE event_time BETWEEN $1 AND $2 \
     ORDER BY event_time DESC OFFSET $3 LIMIT $4";

const VISITOR_EVENTS: &str = "SELECT pin::text AS pin, name, dev_alias, event_point_name, event_time \
     FROM vis_visitor_lastaddr WHERE event_time BETWEEN $1 AND $2";

const VISIT_META: &str = "SELECT vis_emp_pin::text AS vis_emp_pin, vis_company, visit_reason, \
     visited_emp_dept, visited_emp_name FROM vis_transaction \
     WHERE vis_emp_pin::text = ANY($1) AND update_time BETWEEN $2 AND $3 \
     ORDER BY update_time ASC";

const PERSON: &str = "SELECT id::text AS id, pin, name, gender FROM pers_person WHERE pin = $1";

const PLATE: &str =
    "SELECT car_number FROM park_car_number WHERE person_id::text = $1 LIMIT 1";

const ATTRIBUTE_SLOTS: &str =
    "SELECT attr_name, filed_index FROM pers_attribute WHERE LOWER(attr_name) = ANY($1)";

const ATTRIBUTE_ROW: &str = "SELECT * FROM pers_attribute_ext WHERE person_id::text = $1";

#[derive(Debug, sqlx::FromRow)]
struct BadgeRow {
    pin: Option<String>,
    name: Option<String>,
    dept_name: Option<String>,
    dev_alias: Option<String>,
    event_point_name: Option<String>,
    event_time: Option<NaiveDateTime>,
}

impl From<BadgeRow> for RawEvent {
    fn from(row: BadgeRow) -> Self {
        RawEvent {
            identity_id: row.pin.unwrap_or_default(),
            display_name: row.name.unwrap_or_default(),
            department_name: row.dept_name.unwrap_or_default(),
            device_alias: row.dev_alias.unwrap_or_default(),
            event_point_name: row.event_point_name.unwrap_or_default(),
            event_time: EventTime::from(row.event_time),
            origin: Origin::Employee,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VisitorRow {
    pin: Option<String>,
    name: Option<String>,
    dev_alias: Option<String>,
    event_point_name: Option<String>,
    event_time: Option<NaiveDateTime>,
}

impl From<VisitorRow> for RawEvent {
    fn from(row: VisitorRow) -> Self {
        RawEvent {
            identity_id: row.pin.unwrap_or_default(),
            display_name: row.name.unwrap_or_default(),
            department_name: String::new(),
            device_alias: row.dev_alias.unwrap_or_default(),
            event_point_name: row.event_point_name.unwrap_or_default(),
            event_time: EventTime::from(row.event_time),
            origin: Origin::Visitor,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VisitRow {
    vis_emp_pin: Option<String>,
    vis_company: Option<String>,
    visit_reason: Option<String>,
    visited_emp_dept: Option<String>,
    visited_emp_name: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct PersonRow {
    id: String,
    pin: Option<String>,
    name: Option<String>,
    gender: Option<String>,
}

/// `EventStore` over the access-control PostgreSQL schema
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Build a lazily-connecting pool for the given URL
    pub fn connect_lazy(url: Option<&str>) -> Result<Self, StoreError> {
        let url = url.filter(|u| !u.trim().is_empty()).ok_or(StoreError::NotConfigured)?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(url)
            .map_err(StoreError::query("connect"))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn fetch_badge_page(
        &self,
        window: TimeWindow,
        order: FetchOrder,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<RawEvent>, StoreError> {
        let sql = match order {
            FetchOrder::Asc => BADGE_PAGE_ASC,
            FetchOrder::Desc => BADGE_PAGE_DESC,
        };
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows: Vec<BadgeRow> = sqlx::query_as(sql)
            .bind(window.start)
            .bind(window.end)
            .bind(offset)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::query("badge_page"))?;

        debug!(offset = %offset, rows = %rows.len(), "badge_page_fetched");
        Ok(rows.into_iter().map(RawEvent::from).collect())
    }

    async fn fetch_visitor_events(&self, window: TimeWindow) -> Result<Vec<RawEvent>, StoreError> {
        let rows: Vec<VisitorRow> = sqlx::query_as(VISITOR_EVENTS)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::query("visitor_events"))?;
        Ok(rows.into_iter().map(RawEvent::from).collect())
    }

    async fn fetch_visit_meta(
        &self,
        identities: &[String],
        window: TimeWindow,
    ) -> Result<Vec<VisitorMeta>, StoreError> {
        let rows: Vec<VisitRow> = sqlx::query_as(VISIT_META)
            .bind(identities)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::query("visit_meta"))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(VisitorMeta {
                    identity_id: row.vis_emp_pin?,
                    company: row.vis_company,
                    visit_reason: row.visit_reason,
                    host_name: row.visited_emp_name,
                    host_department: row.visited_emp_dept,
                })
            })
            .collect())
    }

    async fn fetch_person(&self, identity_id: &str) -> Result<Option<PersonRecord>, StoreError> {
        let row: Option<PersonRow> = sqlx::query_as(PERSON)
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::query("person"))?;

        Ok(row.map(|row| PersonRecord {
            person_id: row.id,
            identity_id: row.pin.unwrap_or_else(|| identity_id.to_string()),
            name: row.name.unwrap_or_default(),
            gender: row.gender,
        }))
    }

    async fn fetch_plate(&self, person_id: &str) -> Result<Option<String>, StoreError> {
        let plate: Option<Option<String>> = sqlx::query_scalar(PLATE)
            .bind(person_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::query("plate"))?;
        Ok(plate.flatten().filter(|p| !p.trim().is_empty()))
    }

    async fn fetch_attribute_slots(
        &self,
        names: &[String],
    ) -> Result<Vec<AttributeSlot>, StoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(ATTRIBUTE_SLOTS)
            .bind(names)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::query("attribute_slots"))?;

        let mut slots = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("attr_name").map_err(StoreError::query("attribute_slots"))?;
            let index: i32 = row.try_get("filed_index").map_err(StoreError::query("attribute_slots"))?;
            if let Ok(index) = usize::try_from(index) {
                slots.push(AttributeSlot { name: name.to_lowercase(), index });
            }
        }
        Ok(slots)
    }

    async fn fetch_attribute_row(
        &self,
        person_id: &str,
    ) -> Result<Option<Vec<Option<String>>>, StoreError> {
        let row = sqlx::query(ATTRIBUTE_ROW)
            .bind(person_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::query("attribute_row"))?;

        // Non-text columns read as NULL; only text attributes are configured
        Ok(row.map(|row| {
            (0..row.len()).map(|i| row.try_get::<Option<String>, _>(i).ok().flatten()).collect()
        }))
    }
}

//! Raw row validation and timestamp parsing
//!
//! Rows with a blank identity, no device at all, or an unusable event time are
//! expected data-quality gaps in the hardware feed; they are dropped, not
//! reported as errors.

use crate::domain::types::{
    EventTime, NormalizedEvent, Origin, RawEvent, TIME_FORMAT, UNKNOWN_DEPARTMENT,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

/// Display name given to visitor reads that carry none
pub const UNKNOWN_VISITOR_NAME: &str = "TIDAK DIKETAHUI";

/// How forgiving text timestamp parsing is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Only `YYYY-MM-DD HH:MM:SS`
    #[default]
    Strict,
    /// Also `T` separator, fractional seconds, and a bare date (midnight)
    Lenient,
}

/// Parse a text timestamp according to the mode
pub fn parse_time(text: &str, mode: ParseMode) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, TIME_FORMAT) {
        return Some(dt);
    }
    if mode == ParseMode::Strict {
        return None;
    }

    const LENIENT_FORMATS: [&str; 4] =
        ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    for format in LENIENT_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }

    // Last resort: the 10-character date prefix at midnight
    text.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Ordering key for raw rows before validation (lenient, `None` sorts first)
pub fn sort_time(time: &EventTime) -> Option<NaiveDateTime> {
    match time {
        EventTime::Native(dt) => Some(*dt),
        EventTime::Text(text) => parse_time(text, ParseMode::Lenient),
        EventTime::Missing => None,
    }
}

/// Validates raw rows into `NormalizedEvent`s
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    mode: ParseMode,
    visitor_department: String,
}

impl EventNormalizer {
    pub fn new(mode: ParseMode, visitor_department: &str) -> Self {
        Self { mode, visitor_department: visitor_department.trim().to_string() }
    }

    pub fn event_time(&self, time: &EventTime) -> Option<NaiveDateTime> {
        match time {
            EventTime::Native(dt) => Some(*dt),
            EventTime::Text(text) => parse_time(text, self.mode),
            EventTime::Missing => None,
        }
    }

    /// Normalize a raw row, or `None` when a required field is missing
    pub fn normalize(&self, raw: &RawEvent) -> Option<NormalizedEvent> {
        let identity_id = raw.identity_id.trim();
        if identity_id.is_empty() {
            return None;
        }

        let device_alias = raw.device_alias.trim().to_uppercase();
        let event_point_name = raw.event_point_name.trim().to_uppercase();
        if device_alias.is_empty() && event_point_name.is_empty() {
            return None;
        }

        let time = self.event_time(&raw.event_time)?;

        let department = match raw.department_name.trim() {
            "" => match raw.origin {
                Origin::Employee => UNKNOWN_DEPARTMENT.to_string(),
                Origin::Visitor => self.visitor_department.clone(),
            },
            dept => dept.to_string(),
        };
        if department.is_empty() {
            return None;
        }

        let display_name = match (raw.display_name.trim(), raw.origin) {
            ("", Origin::Visitor) => UNKNOWN_VISITOR_NAME.to_string(),
            (name, _) => name.to_string(),
        };

        Some(NormalizedEvent {
            identity_id: identity_id.to_string(),
            display_name,
            department,
            device_alias,
            event_point_name,
            time,
            origin: raw.origin,
        })
    }
}

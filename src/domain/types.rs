//! Shared event types for the badge pipeline

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Wall-clock format used by the access-control store and in snapshots
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Department assigned when an employee row carries none, and to carry-over seeds
pub const UNKNOWN_DEPARTMENT: &str = "UNKNOWN";

/// Where a badge read came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    #[default]
    Employee,
    Visitor,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Employee => "employee",
            Origin::Visitor => "visitor",
        }
    }
}

/// Direction of a classified badge read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Result of classifying a device against a zone's configured device lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Entry,
    Exit,
    Unknown,
}

impl DeviceRole {
    /// Direction for known roles, `None` for unknown devices
    #[inline]
    pub fn direction(self) -> Option<Direction> {
        match self {
            DeviceRole::Entry => Some(Direction::In),
            DeviceRole::Exit => Some(Direction::Out),
            DeviceRole::Unknown => None,
        }
    }
}

/// Event time as delivered by the store: a native timestamp or a text value
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EventTime {
    #[default]
    Missing,
    Native(NaiveDateTime),
    Text(String),
}

impl From<Option<NaiveDateTime>> for EventTime {
    fn from(value: Option<NaiveDateTime>) -> Self {
        value.map(EventTime::Native).unwrap_or_default()
    }
}

fn deserialize_event_time<'de, D>(deserializer: D) -> Result<EventTime, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct EventTimeVisitor;

    impl<'de> Visitor<'de> for EventTimeVisitor {
        type Value = EventTime;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a timestamp string, epoch seconds or null")
        }

        fn visit_str<E>(self, value: &str) -> Result<EventTime, E>
        where
            E: de::Error,
        {
            Ok(EventTime::Text(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<EventTime, E>
        where
            E: de::Error,
        {
            Ok(EventTime::Text(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<EventTime, E>
        where
            E: de::Error,
        {
            Ok(DateTime::from_timestamp(value, 0)
                .map(|dt| EventTime::Native(dt.naive_utc()))
                .unwrap_or_default())
        }

        fn visit_u64<E>(self, value: u64) -> Result<EventTime, E>
        where
            E: de::Error,
        {
            match i64::try_from(value) {
                Ok(secs) => self.visit_i64(secs),
                Err(_) => Ok(EventTime::Missing),
            }
        }

        fn visit_unit<E>(self) -> Result<EventTime, E>
        where
            E: de::Error,
        {
            Ok(EventTime::Missing)
        }

        fn visit_none<E>(self) -> Result<EventTime, E>
        where
            E: de::Error,
        {
            Ok(EventTime::Missing)
        }
    }

    deserializer.deserialize_any(EventTimeVisitor)
}

/// One badge read as delivered by the store, before any validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub identity_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub department_name: String,
    #[serde(default)]
    pub device_alias: String,
    #[serde(default)]
    pub event_point_name: String,
    #[serde(default, deserialize_with = "deserialize_event_time")]
    pub event_time: EventTime,
    #[serde(default)]
    pub origin: Origin,
}

/// A raw event that passed validation: trimmed fields, parsed time
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub identity_id: String,
    pub display_name: String,
    pub department: String,
    /// Uppercased, trimmed device alias (may be empty)
    pub device_alias: String,
    /// Uppercased, trimmed event point name (may be empty)
    pub event_point_name: String,
    pub time: NaiveDateTime,
    pub origin: Origin,
}

/// A normalized event with a resolved direction, ready for the state machine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedEvent {
    pub identity_id: String,
    #[serde(skip)]
    pub display_name: String,
    #[serde(skip)]
    pub department: String,
    /// Effective device key used for classification
    pub device: String,
    #[serde(with = "wall_clock")]
    pub time: NaiveDateTime,
    /// Wall-clock seconds (local time read as UTC); only compared, never converted
    pub unix_ts: i64,
    pub direction: Direction,
    #[serde(skip)]
    pub origin: Origin,
    /// Position in the fetched list, breaks timestamp ties
    #[serde(skip)]
    pub seq: usize,
}

impl ClassifiedEvent {
    pub fn from_normalized(
        event: NormalizedEvent,
        device: String,
        direction: Direction,
        seq: usize,
    ) -> Self {
        Self {
            unix_ts: event.time.and_utc().timestamp(),
            identity_id: event.identity_id,
            display_name: event.display_name,
            department: event.department,
            device,
            time: event.time,
            direction,
            origin: event.origin,
            seq,
        }
    }
}

/// Visit metadata joined onto visitor sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitorMeta {
    pub identity_id: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub visit_reason: Option<String>,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub host_department: Option<String>,
}

/// Personnel record looked up for identity detail
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PersonRecord {
    /// Internal row id used to join plate and attribute tables
    pub person_id: String,
    pub identity_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gender: Option<String>,
}

/// Serde helper writing `NaiveDateTime` in the store's wall-clock format
pub mod wall_clock {
    use super::TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&time.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_from_json_text_time() {
        let raw: RawEvent = serde_json::from_str(
            r#"{"identity_id":"P1","device_alias":"GATE-A","event_time":"2024-01-01 08:00:00"}"#,
        )
        .unwrap();
        assert_eq!(raw.identity_id, "P1");
        assert_eq!(raw.event_time, EventTime::Text("2024-01-01 08:00:00".to_string()));
        assert_eq!(raw.origin, Origin::Employee);
    }

    #[test]
    fn test_raw_event_epoch_and_null_time() {
        let raw: RawEvent =
            serde_json::from_str(r#"{"identity_id":"P1","event_time":1704096000}"#).unwrap();
        let expected = NaiveDateTime::parse_from_str("2024-01-01 08:00:00", TIME_FORMAT).unwrap();
        assert_eq!(raw.event_time, EventTime::Native(expected));

        let raw: RawEvent =
            serde_json::from_str(r#"{"identity_id":"P1","event_time":null}"#).unwrap();
        assert_eq!(raw.event_time, EventTime::Missing);
    }

    #[test]
    fn test_device_role_direction() {
        assert_eq!(DeviceRole::Entry.direction(), Some(Direction::In));
        assert_eq!(DeviceRole::Exit.direction(), Some(Direction::Out));
        assert_eq!(DeviceRole::Unknown.direction(), None);
    }
}

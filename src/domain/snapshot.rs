//! Published rollups: the live zone snapshot and the periodic chart rollup

use crate::domain::types::{VisitorMeta, TIME_FORMAT};
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Detail record for an identity currently inside a zone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonDetail {
    pub id: String,
    pub name: String,
    /// Last logical transition, wall-clock format
    pub time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gender: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plate: String,
    /// Configured custom attributes (lowercased name -> value)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor: Option<VisitorMeta>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub possibly_stuck: bool,
}

/// In/out/current counts for one department within a zone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepartmentRollup {
    pub department: String,
    pub in_count: u32,
    pub out_count: u32,
    pub current_count: u32,
    pub people: Vec<PersonDetail>,
}

/// Per-cycle diagnostics carried on the snapshot for operators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleDiagnostics {
    pub events_fetched: usize,
    pub visitor_events: usize,
    pub events_dropped: usize,
    pub event_point_resolved: usize,
    pub sessions: usize,
    #[serde(default)]
    pub unknown_devices: Vec<String>,
}

/// Result of one aggregation cycle for a zone
///
/// Replaced wholesale at publish time; never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zone: String,
    pub offline: bool,
    pub total_in: u32,
    pub total_out: u32,
    pub total_current: u32,
    pub departments: Vec<DepartmentRollup>,
    /// Copies of details flagged possibly stuck
    pub warnings: Vec<PersonDetail>,
    pub generated_at: String,
    #[serde(default)]
    pub cycle_id: String,
    #[serde(default)]
    pub diagnostics: CycleDiagnostics,
}

impl ZoneSnapshot {
    /// Explicit "unavailable" result, used when the store could not be read
    pub fn offline(zone: &str, now: NaiveDateTime) -> Self {
        Self {
            zone: zone.to_string(),
            offline: true,
            total_in: 0,
            total_out: 0,
            total_current: 0,
            departments: Vec::new(),
            warnings: Vec::new(),
            generated_at: now.format(TIME_FORMAT).to_string(),
            cycle_id: String::new(),
            diagnostics: CycleDiagnostics::default(),
        }
    }

    pub fn department(&self, name: &str) -> Option<&DepartmentRollup> {
        self.departments.iter().find(|d| d.department == name)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Bucket size for the periodic rollup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodMode {
    #[default]
    Day,
    Week,
    Month,
}

impl PeriodMode {
    /// Bucket label for a timestamp: `YYYY-MM-DD`, ISO `YYYY-Www`, or `YYYY-MM`
    pub fn label(self, time: NaiveDateTime) -> String {
        match self {
            PeriodMode::Day => time.format("%Y-%m-%d").to_string(),
            PeriodMode::Week => {
                let iso = time.iso_week();
                format!("{}-W{:02}", iso.year(), iso.week())
            }
            PeriodMode::Month => time.format("%Y-%m").to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodMode::Day => "day",
            PeriodMode::Week => "week",
            PeriodMode::Month => "month",
        }
    }
}

impl std::str::FromStr for PeriodMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(PeriodMode::Day),
            "week" => Ok(PeriodMode::Week),
            "month" => Ok(PeriodMode::Month),
            other => Err(format!("unknown period mode '{other}'")),
        }
    }
}

/// Counts for one zone inside a bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneCounts {
    #[serde(rename = "in")]
    pub in_count: u32,
    #[serde(rename = "out")]
    pub out_count: u32,
    #[serde(rename = "cur")]
    pub current: u32,
}

impl ZoneCounts {
    pub(crate) fn settle(&mut self) {
        self.current = self.in_count.saturating_sub(self.out_count);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRow {
    pub label: String,
    pub zones: BTreeMap<String, ZoneCounts>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentRow {
    pub department: String,
    pub zones: BTreeMap<String, ZoneCounts>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodDepartmentCell {
    pub label: String,
    pub department: String,
    pub zones: BTreeMap<String, ZoneCounts>,
}

/// Time-bucketed rollup for charting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicRollup {
    pub mode: PeriodMode,
    pub offline: bool,
    pub zones: Vec<String>,
    /// Sorted ascending by label
    pub periods: Vec<PeriodRow>,
    /// Sorted ascending by department
    pub departments: Vec<DepartmentRow>,
    /// Sorted by label, then department
    pub cells: Vec<PeriodDepartmentCell>,
}

impl PeriodicRollup {
    pub fn empty(mode: PeriodMode, zones: Vec<String>, offline: bool) -> Self {
        Self {
            mode,
            offline,
            zones,
            periods: Vec::new(),
            departments: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.periods.iter().map(|p| p.label.as_str()).collect()
    }

    /// Counts for a (period, department, zone) cell
    pub fn cell(&self, label: &str, department: &str, zone: &str) -> Option<ZoneCounts> {
        self.cells
            .iter()
            .find(|c| c.label == label && c.department == department)
            .and_then(|c| c.zones.get(zone).copied())
    }

    pub fn period(&self, label: &str, zone: &str) -> Option<ZoneCounts> {
        self.periods
            .iter()
            .find(|p| p.label == label)
            .and_then(|p| p.zones.get(zone).copied())
    }
}

//! Per-identity session produced by the state machine
//!
//! Sessions are rebuilt from scratch every cycle from the fetched windows;
//! nothing here is carried across cycles.

use crate::domain::types::{wall_clock, ClassifiedEvent, Direction, Origin, VisitorMeta};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Where the automaton believes the identity currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Outside,
    Inside,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Outside => "outside",
            SessionStatus::Inside => "inside",
        }
    }
}

/// Reconstructed entry/exit session for one identity
#[derive(Debug, Clone, Serialize)]
pub struct PersonSession {
    pub identity_id: String,
    pub department: String,
    pub display_name: String,
    pub origin: Origin,
    /// Logical transitions only; duplicate reads are not kept
    pub transitions: Vec<ClassifiedEvent>,
    pub status: SessionStatus,
    pub logical_in_count: u32,
    pub logical_out_count: u32,
    pub current_occupancy: i64,
    #[serde(with = "wall_clock")]
    pub last_transition_time: NaiveDateTime,
    pub possibly_stuck: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor: Option<VisitorMeta>,
}

impl PersonSession {
    /// Occupancy contribution, never negative
    #[inline]
    pub fn clamped_occupancy(&self) -> u32 {
        u32::try_from(self.current_occupancy.max(0)).unwrap_or(u32::MAX)
    }

    #[inline]
    pub fn is_inside(&self) -> bool {
        self.current_occupancy > 0
    }

    /// Most recent logical "in", if any
    pub fn last_in(&self) -> Option<&ClassifiedEvent> {
        self.transitions.iter().rev().find(|ev| ev.direction == Direction::In)
    }
}

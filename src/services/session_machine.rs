//! Per-identity entry/exit state machine
//!
//! Turns time-ordered badge reads into deduplicated logical transitions:
//! - `outside --in--> inside` counts one logical in
//! - `inside --out--> outside` counts one logical out
//! - anything else is a duplicate read and is ignored
//!
//! The same replay serves the live rollup and the historical chart; the mode
//! only decides whether stuck sessions are flagged against a reference time.
//! A previous-window event set can be merged in to recover sessions that
//! started before the current window (carry-over).

use crate::domain::session::{PersonSession, SessionStatus};
use crate::domain::types::{ClassifiedEvent, Direction, Origin, UNKNOWN_DEPARTMENT};
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use rustc_hash::FxHashMap;

/// Default threshold after which an open session is flagged possibly stuck
pub const DEFAULT_STUCK_THRESHOLD_SECS: i64 = 12 * 3600;

/// What the replay is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineMode {
    /// Live rollup: flag inside sessions older than `stuck_threshold` at `now`
    Live { now: NaiveDateTime, stuck_threshold: TimeDelta },
    /// Historical chart: no reference time, no stuck detection
    Historical,
}

impl MachineMode {
    pub fn live(now: NaiveDateTime, stuck_threshold_secs: u64) -> Self {
        let secs = i64::try_from(stuck_threshold_secs).unwrap_or(DEFAULT_STUCK_THRESHOLD_SECS);
        MachineMode::Live { now, stuck_threshold: TimeDelta::seconds(secs) }
    }
}

/// Time-of-day band from which previous-window reads may carry over
///
/// The band wraps midnight: a time qualifies when it is at or after
/// `evening_start` or at or before `morning_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarryOverBand {
    pub evening_start: NaiveTime,
    pub morning_end: NaiveTime,
}

impl Default for CarryOverBand {
    fn default() -> Self {
        Self {
            evening_start: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default(),
            morning_end: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
        }
    }
}

impl CarryOverBand {
    #[inline]
    pub fn contains(&self, time: NaiveDateTime) -> bool {
        let t = time.time();
        t >= self.evening_start || t <= self.morning_end
    }
}

/// Result of replaying one identity's reads through the automaton
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replay {
    pub transitions: Vec<ClassifiedEvent>,
    pub status: SessionStatus,
    pub logical_in: u32,
    pub logical_out: u32,
    pub current: i64,
}

/// Replay reads that are already in processing order
pub fn replay<'a, I>(events: I) -> Replay
where
    I: IntoIterator<Item = &'a ClassifiedEvent>,
{
    let mut out = Replay::default();
    for ev in events {
        match (ev.direction, out.status) {
            (Direction::In, SessionStatus::Outside) => {
                out.status = SessionStatus::Inside;
                out.logical_in += 1;
                out.current += 1;
                out.transitions.push(ev.clone());
            }
            (Direction::Out, SessionStatus::Inside) => {
                out.status = SessionStatus::Outside;
                out.logical_out += 1;
                out.current -= 1;
                out.transitions.push(ev.clone());
            }
            _ => {}
        }
    }
    out
}

/// Reads collected for one identity before replay
struct PendingPerson {
    identity_id: String,
    department: String,
    display_name: String,
    origin: Origin,
    events: Vec<ClassifiedEvent>,
}

/// Builds `PersonSession`s from classified events
#[derive(Debug, Clone)]
pub struct SessionMachine {
    mode: MachineMode,
    band: CarryOverBand,
}

impl SessionMachine {
    pub fn new(mode: MachineMode) -> Self {
        Self { mode, band: CarryOverBand::default() }
    }

    pub fn with_band(mut self, band: CarryOverBand) -> Self {
        self.band = band;
        self
    }

    pub fn mode(&self) -> MachineMode {
        self.mode
    }

    /// Build sessions from the current window, merging carry-over reads
    ///
    /// Returned sessions are sorted by last transition time, most recent first.
    /// Identities without any logical transition produce no session.
    pub fn build(
        &self,
        current: Vec<ClassifiedEvent>,
        previous: &[ClassifiedEvent],
    ) -> Vec<PersonSession> {
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        let mut people: Vec<PendingPerson> = Vec::new();

        for ev in current {
            let slot = match index.get(&ev.identity_id) {
                Some(&slot) => slot,
                None => {
                    index.insert(ev.identity_id.clone(), people.len());
                    people.push(PendingPerson {
                        identity_id: ev.identity_id.clone(),
                        department: ev.department.clone(),
                        display_name: ev.display_name.clone(),
                        origin: ev.origin,
                        events: Vec::new(),
                    });
                    people.len() - 1
                }
            };
            people[slot].events.push(ev);
        }

        self.merge_carry_over(&mut index, &mut people, previous);

        let mut sessions: Vec<PersonSession> =
            people.into_iter().filter_map(|person| self.finish(person)).collect();
        sessions.sort_by(|a, b| b.last_transition_time.cmp(&a.last_transition_time));
        sessions
    }

    fn merge_carry_over(
        &self,
        index: &mut FxHashMap<String, usize>,
        people: &mut Vec<PendingPerson>,
        previous: &[ClassifiedEvent],
    ) {
        // Only in-band "in" reads can open a carried-over session
        let mut prior_order: Vec<&str> = Vec::new();
        let mut prior: FxHashMap<&str, Vec<&ClassifiedEvent>> = FxHashMap::default();
        for ev in previous {
            if ev.direction != Direction::In || !self.band.contains(ev.time) {
                continue;
            }
            prior
                .entry(ev.identity_id.as_str())
                .or_insert_with(|| {
                    prior_order.push(ev.identity_id.as_str());
                    Vec::new()
                })
                .push(ev);
        }

        for identity in prior_order {
            let Some(prior_ins) = prior.get(identity) else {
                continue;
            };

            if let Some(&slot) = index.get(identity) {
                let person = &mut people[slot];
                for ev in prior_ins {
                    if !person.events.iter().any(|e| e.unix_ts == ev.unix_ts) {
                        person.events.push((*ev).clone());
                    }
                }
            } else if let Some(latest) = prior_ins.iter().max_by_key(|ev| ev.unix_ts) {
                index.insert(identity.to_string(), people.len());
                people.push(PendingPerson {
                    identity_id: identity.to_string(),
                    department: UNKNOWN_DEPARTMENT.to_string(),
                    display_name: String::new(),
                    origin: Origin::Employee,
                    events: vec![(*latest).clone()],
                });
            }
        }
    }

    fn finish(&self, mut person: PendingPerson) -> Option<PersonSession> {
        // Stable: equal timestamps keep fetch order
        person.events.sort_by_key(|ev| ev.unix_ts);
        let replayed = replay(&person.events);
        let last_transition_time = replayed.transitions.last()?.time;

        let possibly_stuck = match self.mode {
            MachineMode::Live { now, stuck_threshold } => {
                replayed.status == SessionStatus::Inside
                    && replayed
                        .transitions
                        .iter()
                        .rev()
                        .find(|ev| ev.direction == Direction::In)
                        .is_some_and(|last_in| now - last_in.time > stuck_threshold)
            }
            MachineMode::Historical => false,
        };

        Some(PersonSession {
            identity_id: person.identity_id,
            department: person.department,
            display_name: person.display_name,
            origin: person.origin,
            transitions: replayed.transitions,
            status: replayed.status,
            logical_in_count: replayed.logical_in,
            logical_out_count: replayed.logical_out,
            current_occupancy: replayed.current,
            last_transition_time,
            possibly_stuck,
            visitor: None,
        })
    }
}

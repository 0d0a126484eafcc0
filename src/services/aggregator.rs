//! Summary aggregation: live zone snapshot and periodic chart rollup
//!
//! Both rollups are synchronous over already-built sessions. Identity details
//! for employees are resolved by the caller beforehand and passed in.

use crate::domain::session::PersonSession;
use crate::domain::snapshot::{
    CycleDiagnostics, DepartmentRollup, DepartmentRow, PeriodDepartmentCell, PeriodMode,
    PeriodRow, PeriodicRollup, PersonDetail, ZoneCounts, ZoneSnapshot,
};
use crate::domain::types::{Direction, Origin, TIME_FORMAT};
use crate::io::store::TimeWindow;
use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Origin label carried on visitor details
pub const VISITOR_LABEL: &str = "visitor";

/// Detail for a visitor, built from the session and its visit metadata
pub fn visitor_detail(session: &PersonSession) -> PersonDetail {
    PersonDetail {
        id: session.identity_id.clone(),
        name: session.display_name.clone(),
        time: session.last_transition_time.format(TIME_FORMAT).to_string(),
        label: Some(VISITOR_LABEL.to_string()),
        visitor: session.visitor.clone(),
        ..Default::default()
    }
}

/// Everything needed to stamp a live snapshot besides the sessions
#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    pub zone: String,
    pub generated_at: NaiveDateTime,
    pub cycle_id: String,
    pub diagnostics: CycleDiagnostics,
}

/// Live rollup of one zone's sessions
///
/// Departments appear in the order their first session is seen; sessions are
/// expected most-recent first. Only identities currently inside get a detail
/// record. `details` holds pre-resolved employee details by identity; an
/// employee missing from it gets a minimal detail.
pub fn live_rollup(
    meta: SnapshotMeta,
    sessions: &[PersonSession],
    details: &FxHashMap<String, PersonDetail>,
) -> ZoneSnapshot {
    let mut departments: Vec<DepartmentRollup> = Vec::new();
    let mut index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut warnings = Vec::new();
    let (mut total_in, mut total_out, mut total_current) = (0u32, 0u32, 0u32);

    for session in sessions {
        let slot = *index.entry(session.department.as_str()).or_insert_with(|| {
            departments.push(DepartmentRollup {
                department: session.department.clone(),
                ..Default::default()
            });
            departments.len() - 1
        });
        let dept = &mut departments[slot];

        let current = session.clamped_occupancy();
        dept.in_count += session.logical_in_count;
        dept.out_count += session.logical_out_count;
        dept.current_count += current;
        total_in += session.logical_in_count;
        total_out += session.logical_out_count;
        total_current += current;

        if current == 0 {
            continue;
        }

        let mut detail = match session.origin {
            Origin::Visitor => visitor_detail(session),
            Origin::Employee => details.get(&session.identity_id).cloned().unwrap_or_else(|| {
                PersonDetail {
                    id: session.identity_id.clone(),
                    name: session.display_name.clone(),
                    time: session.last_transition_time.format(TIME_FORMAT).to_string(),
                    ..Default::default()
                }
            }),
        };
        if session.possibly_stuck {
            detail.possibly_stuck = true;
            warnings.push(detail.clone());
        }
        dept.people.push(detail);
    }

    ZoneSnapshot {
        zone: meta.zone,
        offline: false,
        total_in,
        total_out,
        total_current,
        departments,
        warnings,
        generated_at: meta.generated_at.format(TIME_FORMAT).to_string(),
        cycle_id: meta.cycle_id,
        diagnostics: meta.diagnostics,
    }
}

/// Time-bucketed rollup over several zones' sessions
///
/// Every logical transition inside `range` is labelled by `mode` and counted
/// in three buckets: (period, zone), (department, zone) and
/// (period, department, zone). Transitions outside the range only established
/// state during replay. `current` is settled per bucket after counting.
pub fn periodic_rollup(
    mode: PeriodMode,
    range: TimeWindow,
    zones: &[(String, Vec<PersonSession>)],
) -> PeriodicRollup {
    let zone_names: Vec<String> = zones.iter().map(|(name, _)| name.clone()).collect();

    let mut by_period: BTreeMap<String, BTreeMap<String, ZoneCounts>> = BTreeMap::new();
    let mut by_department: BTreeMap<String, BTreeMap<String, ZoneCounts>> = BTreeMap::new();
    let mut by_cell: BTreeMap<(String, String), BTreeMap<String, ZoneCounts>> = BTreeMap::new();

    for (zone, sessions) in zones {
        for session in sessions {
            for transition in session.transitions.iter().filter(|t| range.contains(t.time)) {
                let label = mode.label(transition.time);
                let buckets = [
                    by_period.entry(label.clone()).or_default(),
                    by_department.entry(session.department.clone()).or_default(),
                    by_cell.entry((label, session.department.clone())).or_default(),
                ];
                for bucket in buckets {
                    let counts = bucket.entry(zone.clone()).or_default();
                    match transition.direction {
                        Direction::In => counts.in_count += 1,
                        Direction::Out => counts.out_count += 1,
                    }
                }
            }
        }
    }

    // Every row lists every zone, zero when it saw nothing
    let settle = |mut counts: BTreeMap<String, ZoneCounts>| {
        for name in &zone_names {
            counts.entry(name.clone()).or_default();
        }
        counts.values_mut().for_each(ZoneCounts::settle);
        counts
    };

    let periods = by_period
        .into_iter()
        .map(|(label, zones)| PeriodRow { label, zones: settle(zones) })
        .collect();
    let departments = by_department
        .into_iter()
        .map(|(department, zones)| DepartmentRow { department, zones: settle(zones) })
        .collect();
    let cells = by_cell
        .into_iter()
        .map(|((label, department), zones)| PeriodDepartmentCell {
            label,
            department,
            zones: settle(zones),
        })
        .collect();

    PeriodicRollup { mode, offline: false, zones: zone_names, periods, departments, cells }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ClassifiedEvent, VisitorMeta};
    use crate::services::session_machine::{MachineMode, SessionMachine};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIME_FORMAT).unwrap()
    }

    fn ev(id: &str, dept: &str, direction: Direction, time: &str, origin: Origin) -> ClassifiedEvent {
        let time = at(time);
        ClassifiedEvent {
            identity_id: id.to_string(),
            display_name: format!("name-{id}"),
            department: dept.to_string(),
            device: "GATE-A".to_string(),
            time,
            unix_ts: time.and_utc().timestamp(),
            direction,
            origin,
            seq: 0,
        }
    }

    fn meta(now: &str) -> SnapshotMeta {
        SnapshotMeta {
            zone: "hijau".to_string(),
            generated_at: at(now),
            cycle_id: "c1".to_string(),
            diagnostics: CycleDiagnostics::default(),
        }
    }

    fn live_sessions(events: Vec<ClassifiedEvent>, now: &str) -> Vec<PersonSession> {
        SessionMachine::new(MachineMode::live(at(now), 12 * 3600)).build(events, &[])
    }

    #[test]
    fn test_live_rollup_counts_and_details() {
        let sessions = live_sessions(
            vec![
                ev("P1", "OPS", Direction::In, "2024-01-02 08:00:00", Origin::Employee),
                ev("P2", "OPS", Direction::In, "2024-01-02 08:30:00", Origin::Employee),
                ev("P2", "OPS", Direction::Out, "2024-01-02 09:00:00", Origin::Employee),
                ev("P3", "HR", Direction::In, "2024-01-02 07:00:00", Origin::Employee),
            ],
            "2024-01-02 10:00:00",
        );
        let mut details = FxHashMap::default();
        details.insert(
            "P1".to_string(),
            PersonDetail { id: "P1".into(), name: "Ana".into(), plate: "B 1".into(), ..Default::default() },
        );

        let snap = live_rollup(meta("2024-01-02 10:00:00"), &sessions, &details);
        assert!(!snap.offline);
        assert_eq!((snap.total_in, snap.total_out, snap.total_current), (3, 1, 2));

        // P2 is most recent, so OPS is seen first
        let names: Vec<&str> = snap.departments.iter().map(|d| d.department.as_str()).collect();
        assert_eq!(names, vec!["OPS", "HR"]);

        let ops = snap.department("OPS").unwrap();
        assert_eq!((ops.in_count, ops.out_count, ops.current_count), (2, 1, 1));
        assert_eq!(ops.people.len(), 1);
        assert_eq!(ops.people[0].plate, "B 1");

        // No cached detail: minimal record
        let hr = snap.department("HR").unwrap();
        assert_eq!(hr.people[0].name, "name-P3");
        assert_eq!(hr.people[0].time, "2024-01-02 07:00:00");
        assert!(snap.warnings.is_empty());
    }

    #[test]
    fn test_stuck_details_are_duplicated_into_warnings() {
        let sessions = live_sessions(
            vec![ev("P1", "OPS", Direction::In, "2024-01-01 08:00:00", Origin::Employee)],
            "2024-01-02 10:00:00",
        );
        let snap = live_rollup(meta("2024-01-02 10:00:00"), &sessions, &FxHashMap::default());

        assert_eq!(snap.warnings.len(), 1);
        assert!(snap.warnings[0].possibly_stuck);
        assert_eq!(snap.department("OPS").unwrap().people[0], snap.warnings[0]);
    }

    #[test]
    fn test_visitor_detail_uses_visit_meta() {
        let mut sessions = live_sessions(
            vec![ev("V1", "TAMU", Direction::In, "2024-01-02 09:00:00", Origin::Visitor)],
            "2024-01-02 10:00:00",
        );
        sessions[0].visitor = Some(VisitorMeta {
            identity_id: "V1".into(),
            company: Some("Acme".into()),
            host_name: Some("Budi".into()),
            ..Default::default()
        });

        let snap = live_rollup(meta("2024-01-02 10:00:00"), &sessions, &FxHashMap::default());
        let person = &snap.department("TAMU").unwrap().people[0];
        assert_eq!(person.label.as_deref(), Some(VISITOR_LABEL));
        assert_eq!(person.visitor.as_ref().unwrap().company.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_periodic_rollup_single_day() {
        let sessions = SessionMachine::new(MachineMode::Historical).build(
            vec![
                ev("P1", "OPS", Direction::In, "2024-01-02 08:00:00", Origin::Employee),
                ev("P1", "OPS", Direction::Out, "2024-01-02 12:00:00", Origin::Employee),
                ev("P1", "OPS", Direction::In, "2024-01-02 13:00:00", Origin::Employee),
            ],
            &[],
        );
        let range = TimeWindow::new(at("2024-01-02 00:00:00"), at("2024-01-02 23:59:59"));
        let rollup = periodic_rollup(
            PeriodMode::Day,
            range,
            &[("pos1".to_string(), sessions), ("pos2".to_string(), Vec::new())],
        );

        let expected = ZoneCounts { in_count: 2, out_count: 1, current: 1 };
        assert_eq!(rollup.labels(), vec!["2024-01-02"]);
        assert_eq!(rollup.period("2024-01-02", "pos1"), Some(expected));
        assert_eq!(rollup.cell("2024-01-02", "OPS", "pos1"), Some(expected));
        assert_eq!(rollup.departments[0].zones.get("pos1"), Some(&expected));
        assert_eq!(rollup.period("2024-01-02", "pos2"), Some(ZoneCounts::default()));
    }

    #[test]
    fn test_periodic_rollup_skips_transitions_before_range() {
        let sessions = SessionMachine::new(MachineMode::Historical).build(
            vec![
                ev("P1", "OPS", Direction::In, "2024-01-01 22:00:00", Origin::Employee),
                ev("P1", "OPS", Direction::Out, "2024-01-02 06:00:00", Origin::Employee),
            ],
            &[],
        );
        let range = TimeWindow::new(at("2024-01-02 00:00:00"), at("2024-01-31 23:59:59"));
        let rollup = periodic_rollup(PeriodMode::Month, range, &[("pos1".to_string(), sessions)]);

        // The out is counted but the in before the range is not; current clamps at zero
        let counts = rollup.period("2024-01", "pos1").unwrap();
        assert_eq!(counts, ZoneCounts { in_count: 0, out_count: 1, current: 0 });
    }

    #[test]
    fn test_periodic_rollup_orders_labels_and_departments() {
        let sessions = SessionMachine::new(MachineMode::Historical).build(
            vec![
                ev("P1", "OPS", Direction::In, "2024-01-09 08:00:00", Origin::Employee),
                ev("P2", "FIN", Direction::In, "2024-01-02 08:00:00", Origin::Employee),
            ],
            &[],
        );
        let range = TimeWindow::new(at("2024-01-01 00:00:00"), at("2024-01-31 23:59:59"));
        let rollup = periodic_rollup(PeriodMode::Week, range, &[("pos1".to_string(), sessions)]);

        assert_eq!(rollup.labels(), vec!["2024-W01", "2024-W02"]);
        let depts: Vec<&str> = rollup.departments.iter().map(|d| d.department.as_str()).collect();
        assert_eq!(depts, vec!["FIN", "OPS"]);
        assert_eq!(rollup.cells.len(), 2);
    }
}

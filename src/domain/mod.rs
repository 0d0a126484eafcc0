//! Domain models - badge events, sessions and published rollups
//!
//! - `types` - raw, normalized and classified badge events
//! - `session` - per-identity session reconstructed by the state machine
//! - `snapshot` - live zone snapshot and periodic chart rollup

pub mod session;
pub mod snapshot;
pub mod types;

pub use session::{PersonSession, SessionStatus};
pub use snapshot::{
    CycleDiagnostics, DepartmentRollup, PeriodMode, PeriodicRollup, PersonDetail, ZoneCounts,
    ZoneSnapshot,
};
pub use types::{
    ClassifiedEvent, DeviceRole, Direction, EventTime, NormalizedEvent, Origin, PersonRecord,
    RawEvent, VisitorMeta,
};

//! Services - the badge-to-occupancy pipeline
//!
//! - `normalizer` - raw row validation and timestamp parsing
//! - `classifier` - device role resolution per zone
//! - `session_machine` - per-identity entry/exit automaton with carry-over
//! - `source` - windowed, paginated event fetching
//! - `enrichment` - visit metadata for visitor sessions
//! - `detail_cache` - identity detail lookup with a bounded cache
//! - `aggregator` - live snapshot and periodic rollup
//! - `pipeline` - one zone cycle end to end, plus the history rollup
//! - `scheduler` - per-zone poll loop and snapshot board

pub mod aggregator;
pub mod classifier;
pub mod detail_cache;
pub mod enrichment;
pub mod normalizer;
pub mod pipeline;
pub mod scheduler;
pub mod session_machine;
pub mod source;

// Re-export commonly used types
pub use classifier::DeviceClassifier;
pub use detail_cache::IdentityDetailCache;
pub use normalizer::{EventNormalizer, ParseMode};
pub use pipeline::{periodic_history, CycleOutcome, ZonePipeline};
pub use scheduler::{SnapshotBoard, ZoneScheduler};
pub use session_machine::{MachineMode, SessionMachine};

//! IO modules - external system interfaces
//!
//! - `store` - `EventStore` trait and `StoreError`
//! - `postgres` - access-control database over sqlx
//! - `memory` - in-memory store for dry runs and tests
//! - `snapshot_sink` - latest zone snapshot to JSON files

pub mod memory;
pub mod postgres;
pub mod snapshot_sink;
pub mod store;

// Re-export commonly used types
pub use memory::MemoryStore;
pub use postgres::PgEventStore;
pub use snapshot_sink::SnapshotSink;
pub use store::{EventStore, StoreError, TimeWindow};

//! Infrastructure - configuration and metrics
//!
//! - `config` - application configuration (TOML loading, env overrides, defaults)
//! - `metrics` - lock-free cycle metrics

pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use config::{Config, ZoneConfig};
pub use metrics::Metrics;

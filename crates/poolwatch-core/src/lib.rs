//! poolwatch-core — shared types for the poolwatch workspace.
//!
//! Holds the monitor's data model (cumulative counters, gauge snapshots,
//! health results), the pool error taxonomy, and the TOML configuration
//! loader with `DB_*` environment overrides.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DatabaseConfig, MonitorConfig, MonitorSettings, PoolSettings};
pub use error::{ConfigError, ConfigResult, PoolError, PoolResult};
pub use types::*;

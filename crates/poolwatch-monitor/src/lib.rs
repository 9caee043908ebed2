//! poolwatch-monitor — observability for a database connection pool.
//!
//! Subscribes to a pool's lifecycle events, keeps cumulative counters,
//! recomputes gauges on demand, flags slow queries, and answers health
//! checks without mutating the pool.
//!
//! # Architecture
//!
//! ```text
//! PoolMonitor
//!   ├── MonitorState (PoolListener) ← created / removed / error callbacks
//!   ├── wrap_query() → WrappedQuery  ← acquired / released + slow-query timing
//!   ├── get_stats() / log_stats()    ← gauges refreshed on every read
//!   ├── health_check()               ← one liveness round-trip, never fails
//!   └── run()                        ← periodic stats line until shutdown
//!
//! shutdown() → final stats line → pool.end()
//! ```

pub mod health;
pub mod monitor;
pub mod prometheus;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

pub use health::HealthTracker;
pub use monitor::{PoolMonitor, WrappedQuery, truncate_query};
pub use prometheus::{render_prometheus, render_up};
pub use shutdown::shutdown;

//! poolwatch-pool — the connection pool collaborator.
//!
//! Exposes the narrow [`ConnectionPool`] capability the monitor depends on,
//! the typed [`PoolListener`] observer for lifecycle events, and a bounded
//! in-process [`Pool`] implementation over a pluggable
//! [`ConnectionFactory`].
//!
//! # Architecture
//!
//! ```text
//! Caller → Pool::query(text, params)
//!   → acquire()   idle connection, or factory.connect() under the size ceiling
//!   → execute on a blocking worker
//!   → lease dropped → returned to idle (or destroyed if broken / draining)
//!
//! Every transition → PoolListener::on_{created,acquired,released,removed,error}
//! ```

pub mod listener;
pub mod pool;
pub mod tcp;

use std::future::Future;
use std::sync::Arc;

use poolwatch_core::{PoolGauges, PoolResult, QueryResult};

pub use listener::PoolListener;
pub use pool::{
    ConnectionBackend, ConnectionFactory, DrainReport, Pool, PoolConfig, PoolTarget, PooledLease,
};
pub use tcp::{TcpBackend, TcpConnectionFactory, TlsConfig};

/// The capability a monitor needs from a connection pool.
///
/// Gauge reads are synchronous and must not block; they may be momentarily
/// inconsistent with each other while the pool is changing size.
pub trait ConnectionPool: Send + Sync + 'static {
    /// Connections currently held by the pool (idle + checked out).
    fn total_count(&self) -> usize;

    /// Connections sitting idle.
    fn idle_count(&self) -> usize;

    /// Callers queued waiting for a connection.
    fn waiting_count(&self) -> usize;

    /// Configured ceiling on `total_count`.
    fn max_size(&self) -> usize;

    /// Register an observer for lifecycle events.
    fn subscribe(&self, listener: Arc<dyn PoolListener>);

    /// Run a query on a pooled connection.
    fn query(
        &self,
        text: &str,
        params: &[serde_json::Value],
    ) -> impl Future<Output = PoolResult<QueryResult>> + Send;

    /// Drain the pool: stop new acquisitions, wait for in-flight work, close everything.
    fn end(&self) -> impl Future<Output = DrainReport> + Send;

    /// All four gauges in one read.
    fn gauges(&self) -> PoolGauges {
        PoolGauges {
            total: self.total_count(),
            idle: self.idle_count(),
            waiting: self.waiting_count(),
            max: self.max_size(),
        }
    }
}

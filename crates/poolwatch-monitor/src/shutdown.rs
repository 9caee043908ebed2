//! Orderly pool shutdown.

use tracing::info;

use poolwatch_pool::{ConnectionPool, DrainReport};

use crate::monitor::PoolMonitor;

/// Log the final stats, then drain the pool.
///
/// The stats line is written before the pool stops accepting work.
/// Callers should stop issuing queries first.
pub async fn shutdown<P: ConnectionPool>(monitor: &PoolMonitor<P>) -> DrainReport {
    let stats = monitor.get_stats();
    info!(
        active = stats.active,
        idle = stats.idle,
        waiting = stats.waiting,
        acquired = stats.stats.acquired,
        released = stats.stats.released,
        created = stats.stats.created,
        removed = stats.stats.removed,
        slow_queries = monitor.slow_query_count(),
        "final database pool stats"
    );

    info!("closing database pool");
    let report = monitor.pool().end().await;
    monitor.refresh_gauges();
    info!(
        closed = report.closed,
        abandoned = report.abandoned,
        "database pool closed"
    );
    report
}

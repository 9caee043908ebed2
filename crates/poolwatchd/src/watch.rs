//! Watch mode — long-running stats reporter.
//!
//! In this mode, the daemon:
//! 1. Builds the pool and attaches a monitor
//! 2. Opens the first connection, failing fast if the database is unreachable
//! 3. Logs pool stats, runs health checks, and maintains idle connections
//! 4. On SIGINT / SIGTERM, stops the loops and drains the pool

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use poolwatch_core::MonitorConfig;
use poolwatch_monitor::{HealthTracker, PoolMonitor, shutdown};
use poolwatch_pool::ConnectionPool;

use crate::bootstrap;

/// Run until a termination signal arrives.
pub async fn run_watch(config: MonitorConfig, interval_secs: Option<u64>) -> anyhow::Result<()> {
    let interval = interval_secs
        .map(Duration::from_secs)
        .unwrap_or(config.monitor.stats_interval);
    let target = bootstrap::target(&config);
    info!(db = %target, interval_secs = interval.as_secs(), "poolwatchd starting in watch mode");

    let pool = Arc::new(bootstrap::build_pool(&config)?);
    let monitor = PoolMonitor::with_settings(Arc::clone(&pool), &config.monitor);

    pool.connect()
        .await
        .with_context(|| format!("connecting to {target}"))?;
    monitor.log_stats();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Stats loop.
    let stats_handle = {
        let monitor = monitor.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { monitor.run(interval, rx).await })
    };

    // Idle reaping and liveness checks.
    let maintenance_handle = {
        let pool = Arc::clone(&pool);
        let rx = shutdown_rx.clone();
        let every = config.pool.maintenance_interval;
        tokio::spawn(async move { pool.run_maintenance(every, rx).await })
    };

    // Health checks.
    let health_handle = {
        let monitor = monitor.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { health_loop(monitor, interval, rx).await })
    };

    wait_for_signal().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = stats_handle.await;
    let _ = maintenance_handle.await;
    let _ = health_handle.await;

    let report = shutdown(&monitor).await;
    info!(
        closed = report.closed,
        abandoned = report.abandoned,
        "poolwatchd stopped"
    );
    Ok(())
}

async fn health_loop<P: ConnectionPool>(
    monitor: PoolMonitor<P>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> HealthTracker {
    let mut tracker = HealthTracker::new();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let result = monitor.health_check().await;
                tracker.record(&result);
            }
            _ = shutdown.changed() => break,
        }
    }
    tracker
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("installing SIGINT handler")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("installing CTRL+C handler")?;
    }
    Ok(())
}

//! One-shot health check.

use std::sync::Arc;

use tracing::info;

use poolwatch_core::{HealthCheckResult, MonitorConfig};
use poolwatch_monitor::{PoolMonitor, render_prometheus, render_up, shutdown};
use poolwatch_pool::ConnectionPool;

use crate::OutputFormat;
use crate::bootstrap;

/// Check the configured database once and print the result to stdout.
///
/// Returns whether the database is healthy. The pool is drained before
/// returning either way.
pub async fn run_check(config: MonitorConfig, format: OutputFormat) -> anyhow::Result<bool> {
    let pool = Arc::new(bootstrap::build_pool(&config)?);
    let monitor = PoolMonitor::with_settings(pool, &config.monitor);
    info!(db = %bootstrap::target(&config), "running database health check");

    let result = monitor.health_check().await;
    let rendered = render(&config.database.name, &monitor, &result, format)?;
    print!("{rendered}");

    shutdown(&monitor).await;
    Ok(result.is_healthy())
}

fn render<P: ConnectionPool>(
    label: &str,
    monitor: &PoolMonitor<P>,
    result: &HealthCheckResult,
    format: OutputFormat,
) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(result)?),
        OutputFormat::Prometheus => {
            let mut out = render_up(label, result.is_healthy());
            out.push_str(&render_prometheus(
                label,
                &monitor.get_stats(),
                monitor.slow_query_count(),
            ));
            out
        }
    })
}

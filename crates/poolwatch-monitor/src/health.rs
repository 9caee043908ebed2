//! Database health checks.
//!
//! A check is one liveness round-trip through the pool. It always produces a
//! [`HealthCheckResult`]; failures are reported in the result, never raised.

use tracing::{debug, info, warn};

use poolwatch_core::{HealthCheckResult, LIVENESS_QUERY};
use poolwatch_pool::ConnectionPool;

use crate::monitor::PoolMonitor;

impl<P: ConnectionPool> PoolMonitor<P> {
    /// Run the liveness statement and report the pool's state.
    ///
    /// Goes straight to the pool, so it does not move the acquired/released
    /// counters or count toward slow queries.
    pub async fn health_check(&self) -> HealthCheckResult {
        match self.pool().query(LIVENESS_QUERY, &[]).await {
            Ok(_) => {
                let stats = self.get_stats();
                debug!(usage = %stats.usage, "database health check passed");
                HealthCheckResult::healthy(stats)
            }
            Err(e) => {
                let mut message = e.to_string();
                if message.trim().is_empty() {
                    message = "database health check failed".to_string();
                }
                warn!(error = %message, "database health check failed");
                HealthCheckResult::unhealthy(message)
            }
        }
    }
}

/// Follows consecutive health check results and logs transitions.
#[derive(Debug, Default)]
pub struct HealthTracker {
    healthy: Option<bool>,
    consecutive_failures: u32,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. Returns `true` when health flipped since the last one.
    pub fn record(&mut self, result: &HealthCheckResult) -> bool {
        let healthy = result.is_healthy();
        if healthy {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }

        let changed = self.healthy != Some(healthy);
        if changed {
            match (self.healthy, healthy) {
                (Some(false), true) => info!("database recovered"),
                (_, false) => warn!(
                    failures = self.consecutive_failures,
                    "database marked unhealthy"
                ),
                (None, true) => debug!("database healthy"),
                (Some(true), true) => {}
            }
        }
        self.healthy = Some(healthy);
        changed
    }

    /// `None` until the first result is recorded.
    pub fn is_healthy(&self) -> Option<bool> {
        self.healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

//! Shared data model: cumulative counters, gauge snapshots, and health results.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Trivial statement used to prove a connection is alive.
pub const LIVENESS_QUERY: &str = "SELECT 1";

/// Whether `text` is the liveness statement, ignoring case, whitespace and a trailing `;`.
pub fn is_liveness_query(text: &str) -> bool {
    let text = text.trim();
    let text = text.strip_suffix(';').unwrap_or(text).trim_end();
    text.eq_ignore_ascii_case(LIVENESS_QUERY)
}

/// Pool lifecycle events that move a cumulative counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Acquired,
    Released,
    Removed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Created => write!(f, "created"),
            EventKind::Acquired => write!(f, "acquired"),
            EventKind::Released => write!(f, "released"),
            EventKind::Removed => write!(f, "removed"),
        }
    }
}

/// Cumulative event counts since process start. Never decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub acquired: u64,
    pub released: u64,
    pub created: u64,
    pub removed: u64,
}

/// The four raw gauge readings taken from a pool at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolGauges {
    /// Connections currently held by the pool (idle + checked out).
    pub total: usize,
    pub idle: usize,
    /// Callers queued for a connection.
    pub waiting: usize,
    /// Configured ceiling.
    pub max: usize,
}

impl PoolGauges {
    /// Connections checked out right now.
    ///
    /// Saturates at zero when a racing read observes more idle than total
    /// connections.
    pub fn active(&self) -> usize {
        self.total.saturating_sub(self.idle)
    }
}

/// Point-in-time pool snapshot combined with the cumulative counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
    pub max: usize,
    /// `"active/max"`.
    pub usage: String,
    pub stats: ConnectionStats,
}

impl PoolStats {
    pub fn new(gauges: PoolGauges, stats: ConnectionStats) -> Self {
        let active = gauges.active();
        Self {
            total: gauges.total,
            active,
            idle: gauges.idle,
            waiting: gauges.waiting,
            max: gauges.max,
            usage: format!("{active}/{}", gauges.max),
            stats,
        }
    }

    /// Percentage of the ceiling in use, rounded to one decimal.
    pub fn usage_percent(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        let pct = self.active as f64 / self.max as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }
}

/// Outcome of a single health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy { connections: PoolStats },
    Unhealthy { error: String },
}

/// A health check answer stamped with the time it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    #[serde(flatten)]
    pub status: HealthStatus,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
}

impl HealthCheckResult {
    pub fn healthy(connections: PoolStats) -> Self {
        Self {
            status: HealthStatus::Healthy { connections },
            timestamp: epoch_millis(),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy {
                error: error.into(),
            },
            timestamp: epoch_millis(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy { .. })
    }
}

/// A query text with its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(text: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }
}

impl AsRef<str> for Statement {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Value>,
    pub row_count: u64,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<serde_json::Value>) -> Self {
        let row_count = rows.len() as u64;
        Self { rows, row_count }
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Current time as Unix epoch milliseconds.
pub fn epoch_millis() -> u64 {
    duration_millis(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    )
}

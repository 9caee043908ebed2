//! Error taxonomy shared by the pool and the monitor.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by the connection pool.
///
/// `Connection` and `Query` carry the underlying message verbatim so callers
/// see exactly what the transport or server reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Establishing a new connection failed.
    #[error("{0}")]
    Connection(String),

    /// A query was rejected or failed mid-flight.
    #[error("{0}")]
    Query(String),

    /// An idle member of the pool failed outside of any query.
    #[error("{0}")]
    Pool(String),

    #[error("connection pool is draining, no new connections accepted")]
    Draining,

    #[error("connection pool exhausted (timeout: {0:?})")]
    Exhausted(Duration),
}

impl PoolError {
    /// Whether the error leaves the connection it happened on unusable.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self, PoolError::Connection(_) | PoolError::Pool(_))
    }
}

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

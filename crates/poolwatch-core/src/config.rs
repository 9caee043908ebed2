//! poolwatch.toml configuration parser with environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub database: DatabaseConfig,
    pub pool: PoolSettings,
    pub monitor: MonitorSettings,
}

/// Connection target and credentials.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub tls: bool,
    pub verify_certificates: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            tls: false,
            verify_certificates: true,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("verify_certificates", &self.verify_certificates)
            .finish()
    }
}

/// Pool sizing and timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_size: usize,
    #[serde(deserialize_with = "duration_str")]
    pub idle_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub connect_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub drain_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub maintenance_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 20,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

/// Monitor thresholds and reporting cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    #[serde(deserialize_with = "duration_str")]
    pub slow_query_threshold: Duration,
    /// Characters of query text kept in slow-query records.
    pub query_log_chars: usize,
    #[serde(deserialize_with = "duration_str")]
    pub stats_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            slow_query_threshold: Duration::from_millis(1000),
            query_log_chars: 100,
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `DB_*` variables from the process environment.
    pub fn with_env_overrides(mut self) -> ConfigResult<Self> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Overlay `DB_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = &mut self.database;
        if let Some(host) = lookup("DB_HOST") {
            db.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            db.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("DB_PORT is not a port: {port}")))?;
        }
        if let Some(name) = lookup("DB_NAME") {
            db.name = name;
        }
        if let Some(user) = lookup("DB_USER") {
            db.user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            db.password = password;
        }
        if let Some(ssl) = lookup("DB_SSL") {
            db.tls = matches!(
                ssl.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "require" | "on"
            );
        }
        if let Some(max) = lookup("DB_POOL_MAX") {
            self.pool.max_size = max.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("DB_POOL_MAX is not a number: {max}"))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.host.trim().is_empty() {
            return Err(ConfigError::Invalid("database.host must not be empty".into()));
        }
        if self.database.port == 0 {
            return Err(ConfigError::Invalid("database.port must be non-zero".into()));
        }
        if self.pool.max_size == 0 {
            return Err(ConfigError::Invalid("pool.max_size must be at least 1".into()));
        }
        if self.monitor.query_log_chars == 0 {
            return Err(ConfigError::Invalid(
                "monitor.query_log_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration string like `500ms`, `30s`, `2m`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn duration_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    /// `"30s"` or a bare integer number of seconds.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(raw) => parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {raw:?}"))),
    }
}

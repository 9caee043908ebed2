//! Config loading and pool construction shared by every subcommand.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use poolwatch_core::MonitorConfig;
use poolwatch_pool::{ConnectionFactory, Pool, PoolConfig, PoolTarget, TcpConnectionFactory, TlsConfig};

/// Read the config file (if any), then overlay `DB_*` variables.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<MonitorConfig> {
    let config = match path {
        Some(path) => MonitorConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    let config = config
        .with_env_overrides()
        .context("applying DB_* environment overrides")?;
    info!(database = ?config.database, max_size = config.pool.max_size, "configuration loaded");
    Ok(config)
}

pub fn target(config: &MonitorConfig) -> PoolTarget {
    let db = &config.database;
    PoolTarget::new(&db.host, db.port, &db.name, &db.user)
}

/// TCP transport for the configured database, TLS-wrapped when enabled.
pub fn connection_factory(config: &MonitorConfig) -> anyhow::Result<Arc<dyn ConnectionFactory>> {
    let timeout = config.pool.connect_timeout;
    if !config.database.tls {
        return Ok(Arc::new(TcpConnectionFactory::plain(timeout, timeout)));
    }
    if !config.database.verify_certificates {
        warn!("tls certificate verification disabled");
    }
    let tls = TlsConfig::for_settings(config.database.verify_certificates)
        .context("building tls client config")?;
    Ok(Arc::new(TcpConnectionFactory::with_tls(timeout, timeout, tls)))
}

pub fn build_pool(config: &MonitorConfig) -> anyhow::Result<Pool> {
    let password = Some(config.database.password.clone()).filter(|p| !p.is_empty());
    Ok(Pool::new(
        PoolConfig::from(&config.pool),
        target(config),
        password,
        connection_factory(config)?,
    ))
}

//! poolwatchd — the poolwatch daemon.
//!
//! Single binary that wires a connection pool to a monitor:
//! - Configuration (TOML file + `DB_*` environment overrides)
//! - Bounded pool over a TCP/TLS transport
//! - Pool monitor (counters, gauges, slow queries)
//! - Health checks and periodic stats logging
//! - Graceful drain on SIGINT / SIGTERM
//!
//! # Usage
//!
//! ```text
//! poolwatchd --config /etc/poolwatch.toml check --format json
//! poolwatchd watch --interval 30
//! ```

mod bootstrap;
mod check;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,poolwatchd=debug,poolwatch=debug";

#[derive(Parser)]
#[command(name = "poolwatchd", about = "Database connection pool monitor")]
struct Cli {
    /// Path to poolwatch.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Prometheus,
}

#[derive(Subcommand)]
enum Command {
    /// Run one health check, print the result, exit non-zero when unhealthy.
    Check {
        /// Output format for the result.
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Connect, log pool stats periodically, and drain on shutdown.
    Watch {
        /// Stats interval in seconds. Overrides `monitor.stats_interval`.
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = bootstrap::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Check { format } => {
            let healthy = check::run_check(config, format).await?;
            Ok(if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Watch { interval } => {
            watch::run_watch(config, interval).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

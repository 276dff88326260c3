//! uplinkd: background upload queue daemon
//!
//! Usage:
//!   uplinkd [--config /etc/uplink/config.toml] [--log info] [--log-format json|text]

mod api;
mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "uplinkd", version, about = "Offline-first upload queue daemon")]
struct Cli {
    /// Path to the uplink configuration file
    #[arg(
        long,
        short = 'c',
        env = "UPLINK_CONFIG",
        default_value = "/etc/uplink/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to daemon.log_level
    #[arg(long, env = "UPLINK_LOG")]
    log: Option<String>,

    /// Log format; defaults to daemon.log_format
    #[arg(long, env = "UPLINK_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_config(s: &str) -> Self {
        match s {
            "text" => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config is read before logging so the [daemon] section can pick the
    // format; a missing file is reported once the subscriber is up.
    let loaded = uplink_core::config::UplinkConfig::load(&cli.config)?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    let level = cli.log.as_deref().unwrap_or(&config.daemon.log_level);
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| LogFormat::from_config(&config.daemon.log_format));
    init_logging(level, &format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "uplinkd starting"
    );

    daemon::run(config).await
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}

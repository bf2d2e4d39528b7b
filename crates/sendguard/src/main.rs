//! `sendguard` - deliverability governance daemon for a mail transfer agent.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use sendguard::{Config, server};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "sendguard=info,sendguard_core=info";

/// Command line.
#[derive(Parser)]
#[command(name = "sendguard")]
#[command(about = "Deliverability governance daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; defaults to the user config directory.
    #[arg(short, long, env = "SENDGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration.
    #[arg(short, long, env = "SENDGUARD_LISTEN")]
    listen: Option<SocketAddr>,

    /// Log filter, e.g. `info` or `sendguard_core=debug`. `RUST_LOG` wins.
    #[arg(long, env = "SENDGUARD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log as JSON lines.
    #[arg(long, env = "SENDGUARD_LOG_JSON")]
    log_json: bool,

    /// Log remote commands instead of running them.
    #[arg(long, env = "SENDGUARD_DRY_RUN")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(cli.log_level.as_deref().unwrap_or(DEFAULT_FILTER))
    });
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting sendguard");
    server::run(config, cli.dry_run).await
}

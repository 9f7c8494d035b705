//! # Portal Gateway
//!
//! Request-governance gateway for the booking portal API.
//!
//! ## Usage
//!
//! ```bash
//! # Start with default configuration
//! portal-gateway
//!
//! # Start with a config file
//! portal-gateway --config /etc/portal/gateway.toml
//!
//! # Start with environment overrides
//! PORTAL_PORT=9000 PORTAL_ENV=production portal-gateway
//! ```

use anyhow::Context;
use clap::Parser;
use portal_server::ServerConfig;
use portal_telemetry::init_logging;
use std::path::PathBuf;
use tracing::{error, info};

/// Booking portal request-governance gateway
#[derive(Parser, Debug)]
#[command(name = "portal-gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "PORTAL_CONFIG")]
    config: Option<PathBuf>,
}

/// Application entry point
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        // Logging may not be up yet
        eprintln!("portal-gateway: {e:#}");
        error!(error = %format!("{e:#}"), "Application failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServerConfig::load(cli.config.as_deref())
        .await
        .context("failed to load configuration")?;

    init_logging(&config.logging).context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        environment = %config.environment,
        "Starting portal gateway"
    );

    portal_server::run(config).await?;
    Ok(())
}

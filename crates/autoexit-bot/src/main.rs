//! Automated exit bot - Entry Point
//!
//! Monitors admitted positions and sells them through the fallback swap
//! dispatcher when a take-profit, stop-loss or trailing-stop fires.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Automated exit bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via AUTOEXIT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    autoexit_telemetry::init_logging()?;

    info!("Starting autoexit bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > AUTOEXIT_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("AUTOEXIT_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = autoexit_bot::AppConfig::from_file(&config_path)?;
    info!(
        owners = config.owners.len(),
        aggregator_url = %config.providers.aggregator_url,
        router_url = %config.providers.router_url,
        "Configuration loaded"
    );

    let app = autoexit_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}

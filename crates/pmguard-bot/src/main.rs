//! pmguard - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Stop-loss, take-profit and trailing-stop monitor for prediction-market positions
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PMGUARD_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before the first stream connection
    pmguard_ws::init_crypto();

    let args = Args::parse();

    // CLI arg > PMGUARD_CONFIG > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PMGUARD_CONFIG").ok())
        .unwrap_or_else(|| pmguard_bot::config::DEFAULT_CONFIG_PATH.to_string());

    let config = pmguard_bot::AppConfig::load(&config_path)?;

    pmguard_telemetry::init_logging(config.telemetry.log_level.as_deref())?;
    info!("Starting pmguard v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        upstream = %config.upstream.base_url,
        owners = config.upstream.owners.len(),
        stream = config.stream.enabled,
        "Configuration loaded"
    );

    let app = pmguard_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use volvo_connector::logging::init_logging;
use volvo_connector::{Connector, ConnectorConfig, Garage};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicit path as the only argument, else the default locations
    let config = match std::env::args().nth(1) {
        Some(path) => ConnectorConfig::from_file(&path),
        None => ConnectorConfig::load(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let garage = Arc::new(Garage::new());
    let connector = Connector::new(config, garage.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create connector: {}", e))?;

    info!(
        "{} {} starting up as {}",
        connector.name(),
        connector.version(),
        connector.id()
    );
    connector
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start connector: {}", e))?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for shutdown signal: {}", e);
    }

    let result = connector.shutdown().await;
    info!("Vehicles still in garage: {}", garage.vins().len());
    result.map_err(|e| anyhow::anyhow!("Shutdown error: {}", e))
}

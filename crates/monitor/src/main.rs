//! Index Monitor - accuracy monitoring daemon for learned-index models
//!
//! Runs alongside the storage engine, ingesting prediction outcomes,
//! rolling them into windowed metrics, tracking per-model health and
//! recording retraining attempts.

use anyhow::Result;
use monitor_lib::{
    probes::components, MetricsStore, MonitorService, ProbeRegistry, StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting index-monitor");

    // Load configuration
    let config = config::MonitorConfig::load()?;
    info!(
        instance = %config.instance,
        data_dir = %config.data_dir.display(),
        window_secs = config.window_secs,
        "Monitor configured"
    );

    // Initialize probe registry
    let probes = ProbeRegistry::new();
    probes.register(components::STORE).await;
    probes.register(components::MONITOR_LOOP).await;
    probes.register(components::INGESTION).await;

    // Open the durable store and build the pipeline
    let store = Arc::new(MetricsStore::open(config.store_config())?);
    let service = Arc::new(MonitorService::new(
        store,
        config.instance.clone(),
        config.monitor_settings(),
    ));

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(MONITOR_VERSION);

    // Start the periodic aggregation/health loop
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = service.spawn_monitor_loop(shutdown_rx);

    // Create shared application state and start the probe/metrics server
    let app_state = Arc::new(api::AppState::new(probes.clone(), service.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Mark the monitor as ready after initialization
    probes.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    // Stop the loop between model iterations and wait for it to drain
    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;
    api_handle.abort();

    Ok(())
}

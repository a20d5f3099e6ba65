//! Topology provisioner daemon
//!
//! Reads a topology definition file, provisions the declared resources
//! with in-process providers, and serves health, readiness, metrics,
//! and topology-description endpoints.

use anyhow::{Context, Result};
use std::sync::Arc;
use topology_lib::{build_topology, Providers, ProvisionLogger, TopologyConfig};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting topologyd");

    // Load configuration
    let daemon_config = config::DaemonConfig::load()?;
    info!(topology_path = %daemon_config.topology_path, "Daemon configured");

    // Load and validate the topology definition
    let raw = tokio::fs::read_to_string(&daemon_config.topology_path)
        .await
        .with_context(|| {
            format!(
                "Failed to read topology definition from {}",
                daemon_config.topology_path
            )
        })?;
    let topology_config = TopologyConfig::from_json(&raw)?;

    let logger = ProvisionLogger::new(&topology_config.name);
    logger.log_startup(DAEMON_VERSION);

    // Provision with in-process providers; every image the definition
    // references is known to the local catalog
    let images: Vec<String> = topology_config
        .deployment_units
        .iter()
        .map(|u| u.image.clone())
        .collect();
    let providers = Providers::in_process(images);

    let handle = Arc::new(build_topology(&topology_config, &providers).await?);
    info!(topology = %handle.name(), "Topology ready");

    // Start health, metrics, and topology server
    let state = Arc::new(api::AppState::new(handle.clone()));
    let api_handle = tokio::spawn(api::serve(daemon_config.api_port, state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    if let Err(e) = handle.teardown().await {
        warn!(error = %e, "Teardown incomplete");
    }
    api_handle.abort();

    Ok(())
}

//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Path to the topology definition file
    #[serde(default = "default_topology_path")]
    pub topology_path: String,

    /// API server port for health/metrics/topology
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_topology_path() -> String {
    std::env::var("TOPOLOGY_FILE").unwrap_or_else(|_| "topology.json".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl DaemonConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("TOPOLOGYD"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| DaemonConfig {
            topology_path: default_topology_path(),
            api_port: default_api_port(),
        }))
    }
}

//! CLI configuration helpers

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use topology_lib::TopologyConfig;

/// Resolve the topology definition path: explicit argument first, then
/// the TOPO_FILE environment variable, then ./topology.json.
pub fn resolve_topology_path(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| std::env::var("TOPO_FILE").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("topology.json"))
}

/// Load and parse a topology definition file.
pub fn load_topology(path: &Path) -> Result<TopologyConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read topology definition from {}", path.display()))?;
    Ok(TopologyConfig::from_json(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = resolve_topology_path(Some(PathBuf::from("custom.json")));
        assert_eq!(path, PathBuf::from("custom.json"));
    }

    #[test]
    fn test_default_path() {
        // no env override in the test environment
        if std::env::var("TOPO_FILE").is_err() {
            assert_eq!(resolve_topology_path(None), PathBuf::from("topology.json"));
        }
    }
}

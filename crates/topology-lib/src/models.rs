//! Shared value types for the topology model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport protocol for firewall rules and port mappings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Processor architecture a deployment unit is built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuArchitecture {
    #[default]
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl fmt::Display for CpuArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuArchitecture::X86_64 => write!(f, "x86_64"),
            CpuArchitecture::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Operating system family of a deployment unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    #[default]
    Linux,
    Windows,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::Windows => write!(f, "windows"),
        }
    }
}

/// Architecture/OS pair a workload runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePlatform {
    pub architecture: CpuArchitecture,
    pub os_family: OsFamily,
}

/// A container port exposed by a deployment unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

/// Default health check path when the caller does not supply one.
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/";

/// Health check definition handed to the external prober.
///
/// This is configuration only: the probing itself is delegated to the
/// `HealthProber` collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub interval_secs: u64,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: DEFAULT_HEALTH_CHECK_PATH.to_string(),
            interval_secs: 30,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

impl HealthCheck {
    /// A health check probing the given path with default thresholds.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Log sink binding for a deployment unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Stream prefix within the external log store. Empty means
    /// "derive from the family name" at provisioning time.
    #[serde(default)]
    pub stream_prefix: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            stream_prefix: String::new(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_default_path() {
        let hc = HealthCheck::default();
        assert_eq!(hc.path, "/");
        assert_eq!(hc.interval_secs, 30);
    }

    #[test]
    fn test_health_check_with_path_overrides() {
        let hc = HealthCheck::with_path("/health");
        assert_eq!(hc.path, "/health");
        assert_eq!(
            hc.healthy_threshold,
            HealthCheck::default().healthy_threshold
        );
    }

    #[test]
    fn test_log_config_default_retention() {
        assert_eq!(LogConfig::default().retention_days, 30);
    }

    #[test]
    fn test_platform_serde_names() {
        let platform = RuntimePlatform {
            architecture: CpuArchitecture::Arm64,
            os_family: OsFamily::Linux,
        };
        let json = serde_json::to_string(&platform).unwrap();
        assert!(json.contains("\"arm64\""));
        assert!(json.contains("\"linux\""));
    }
}

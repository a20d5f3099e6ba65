//! Topology definition: the boundary contract handed to `build_topology`
//!
//! A `TopologyConfig` enumerates everything one deployment declares:
//! network layout, the traffic distributor and its listener, the
//! cluster and discovery domain, deployment units, services, and
//! routing registrations. Validation surfaces every config error
//! before any resource is created.

use crate::deployment::validate_cpu_memory;
use crate::distributor::PathPattern;
use crate::error::{ProvisionError, Result};
use crate::firewall::IngressRule;
use crate::models::{CpuArchitecture, LogConfig, OsFamily, PortMapping, Protocol};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Account and region a topology deploys into.
///
/// Passed explicitly with the definition; the core never reads
/// ambient state for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTarget {
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for DeploymentTarget {
    fn default() -> Self {
        Self {
            account: default_account(),
            region: default_region(),
        }
    }
}

fn default_account() -> String {
    "000000000000".to_string()
}

fn default_region() -> String {
    "local".to_string()
}

/// Network boundary parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_network_name")]
    pub name: String,
    #[serde(default = "default_cidr")]
    pub cidr: String,
    #[serde(default = "default_az_count")]
    pub az_count: u32,
    #[serde(default = "default_nat_gateways")]
    pub nat_gateways: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            cidr: default_cidr(),
            az_count: default_az_count(),
            nat_gateways: default_nat_gateways(),
        }
    }
}

fn default_network_name() -> String {
    "vpc".to_string()
}

fn default_cidr() -> String {
    "10.0.0.0/16".to_string()
}

fn default_az_count() -> u32 {
    2
}

fn default_nat_gateways() -> u32 {
    1
}

/// One ingress permission in config form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressRuleConfig {
    pub source: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub port: u16,
}

impl IngressRuleConfig {
    pub(crate) fn build(&self) -> Result<IngressRule> {
        IngressRule::new(&self.source, self.protocol, self.port)
    }
}

/// Fixed response answered when no routing rule matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultActionConfig {
    #[serde(default = "default_action_status")]
    pub status: u16,
    #[serde(default = "default_action_body")]
    pub body: String,
}

impl Default for DefaultActionConfig {
    fn default() -> Self {
        Self {
            status: default_action_status(),
            body: default_action_body(),
        }
    }
}

fn default_action_status() -> u16 {
    200
}

fn default_action_body() -> String {
    "no Route defined".to_string()
}

/// Traffic distributor and listener parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    #[serde(default = "default_distributor_name")]
    pub name: String,
    #[serde(default = "default_listener_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub internet_facing: bool,
    #[serde(default)]
    pub deletion_protection: bool,
    /// Ingress rules for the distributor's interfaces. Empty means
    /// "open the listener port to any IPv4 source".
    #[serde(default)]
    pub ingress: Vec<IngressRuleConfig>,
    #[serde(default)]
    pub default_action: DefaultActionConfig,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            name: default_distributor_name(),
            port: default_listener_port(),
            internet_facing: true,
            deletion_protection: false,
            ingress: Vec::new(),
            default_action: DefaultActionConfig::default(),
        }
    }
}

fn default_distributor_name() -> String {
    "edge".to_string()
}

fn default_listener_port() -> u16 {
    80
}

fn default_true() -> bool {
    true
}

/// Orchestration cluster parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub name: String,
    #[serde(default)]
    pub discovery_domain: Option<String>,
    #[serde(default = "default_true")]
    pub container_insights: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            discovery_domain: None,
            container_insights: true,
        }
    }
}

fn default_cluster_name() -> String {
    "services".to_string()
}

/// One deployment unit template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentUnitConfig {
    pub family: String,
    #[serde(default = "default_cpu_units")]
    pub cpu_units: u32,
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,
    #[serde(default)]
    pub architecture: CpuArchitecture,
    #[serde(default)]
    pub os_family: OsFamily,
    pub image: String,
    #[serde(default)]
    pub log: LogConfig,
    pub ports: Vec<PortMapping>,
}

fn default_cpu_units() -> u32 {
    256
}

fn default_memory_mib() -> u32 {
    512
}

/// One supervised service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Family of the deployment unit this service runs.
    pub deployment_unit: String,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
    #[serde(default)]
    pub assign_public_ip: bool,
    /// Ingress rules for replica interfaces. Empty means "open the
    /// unit's ports to any IPv4 source".
    #[serde(default)]
    pub ingress: Vec<IngressRuleConfig>,
    #[serde(default = "default_startup_window_secs")]
    pub startup_window_secs: u64,
    #[serde(default = "default_supervision_interval_ms")]
    pub supervision_interval_ms: u64,
}

fn default_desired_count() -> u32 {
    1
}

fn default_startup_window_secs() -> u64 {
    60
}

fn default_supervision_interval_ms() -> u64 {
    1000
}

/// One routing registration binding a service to the listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub service: String,
    pub container_name: String,
    pub container_port: u16,
    #[serde(default = "default_path_patterns")]
    pub path_patterns: Vec<String>,
    pub priority: u32,
    #[serde(default)]
    pub health_check_path: Option<String>,
}

fn default_path_patterns() -> Vec<String> {
    vec!["/*".to_string()]
}

/// The complete declaration of one deployment topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub name: String,
    #[serde(default)]
    pub target: DeploymentTarget,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub distributor: DistributorConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub deployment_units: Vec<DeploymentUnitConfig>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl TopologyConfig {
    /// Parse a topology definition from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ProvisionError::config(format!("topology definition is malformed: {}", e)))
    }

    /// Validate the whole definition. Every config and conflict error
    /// is caught here, before any resource exists.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ProvisionError::config("topology name must not be empty"));
        }
        if self.target.account.is_empty() || self.target.region.is_empty() {
            return Err(ProvisionError::config(
                "deployment target account and region must not be empty",
            ));
        }

        // network layout
        if self.network.az_count < 1 {
            return Err(ProvisionError::config("az_count must be at least 1"));
        }
        if self.network.nat_gateways > self.network.az_count {
            return Err(ProvisionError::config(format!(
                "nat_gateways ({}) cannot exceed az_count ({})",
                self.network.nat_gateways, self.network.az_count
            )));
        }
        self.network.cidr.parse::<Ipv4Network>().map_err(|e| {
            ProvisionError::config(format!(
                "invalid network CIDR '{}': {}",
                self.network.cidr, e
            ))
        })?;

        // resource names are globally unique
        let mut names = HashSet::new();
        let mut claim = |name: &str| -> Result<()> {
            if !names.insert(name.to_string()) {
                return Err(ProvisionError::conflict(format!(
                    "resource name '{}' is declared more than once",
                    name
                )));
            }
            Ok(())
        };
        claim(&self.network.name)?;
        claim(&self.distributor.name)?;
        claim(&self.cluster.name)?;
        for unit in &self.deployment_units {
            claim(&unit.family)?;
        }
        for service in &self.services {
            claim(&service.name)?;
        }

        // firewall rules
        for rule in self
            .distributor
            .ingress
            .iter()
            .chain(self.services.iter().flat_map(|s| s.ingress.iter()))
        {
            rule.build()?;
        }

        // deployment units
        for unit in &self.deployment_units {
            if unit.image.is_empty() {
                return Err(ProvisionError::config(format!(
                    "deployment unit '{}' has no container image reference",
                    unit.family
                )));
            }
            if unit.ports.is_empty() {
                return Err(ProvisionError::config(format!(
                    "deployment unit '{}' needs at least one port mapping",
                    unit.family
                )));
            }
            validate_cpu_memory(unit.cpu_units, unit.memory_mib)?;
            if unit.architecture == CpuArchitecture::Arm64 && unit.os_family == OsFamily::Windows {
                return Err(ProvisionError::config(format!(
                    "deployment unit '{}': arm64 is only supported on linux",
                    unit.family
                )));
            }
        }

        // services reference existing units
        for service in &self.services {
            if !self
                .deployment_units
                .iter()
                .any(|u| u.family == service.deployment_unit)
            {
                return Err(ProvisionError::config(format!(
                    "service '{}' references unknown deployment unit '{}'",
                    service.name, service.deployment_unit
                )));
            }
        }

        // routes reference existing services, use exposed ports, and
        // hold unique positive priorities
        let mut priorities = HashSet::new();
        for route in &self.routes {
            let service = self
                .services
                .iter()
                .find(|s| s.name == route.service)
                .ok_or_else(|| {
                    ProvisionError::config(format!(
                        "route priority {} references unknown service '{}'",
                        route.priority, route.service
                    ))
                })?;
            let unit = self
                .deployment_units
                .iter()
                .find(|u| u.family == service.deployment_unit)
                .expect("service reference already validated");
            if !unit
                .ports
                .iter()
                .any(|p| p.container_port == route.container_port)
            {
                return Err(ProvisionError::config(format!(
                    "route for service '{}' uses container port {} not exposed by unit '{}'",
                    route.service, route.container_port, unit.family
                )));
            }
            if route.priority == 0 {
                return Err(ProvisionError::config(
                    "routing rule priority must be a positive integer",
                ));
            }
            if !priorities.insert(route.priority) {
                return Err(ProvisionError::conflict(format!(
                    "routing priority {} is declared more than once",
                    route.priority
                )));
            }
            for pattern in &route.path_patterns {
                PathPattern::new(pattern)?;
            }
        }

        Ok(())
    }

    /// Simulate the listener's rule evaluation against a request path
    /// using the declared routes: ascending priority, first whose
    /// pattern set matches. `None` means the default action applies.
    pub fn match_route(&self, path: &str) -> Option<&RouteConfig> {
        let mut routes: Vec<&RouteConfig> = self.routes.iter().collect();
        routes.sort_by_key(|r| r.priority);
        routes.into_iter().find(|route| {
            route
                .path_patterns
                .iter()
                .filter_map(|p| PathPattern::new(p).ok())
                .any(|p| p.matches(path))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_json() -> &'static str {
        r#"{
            "name": "web-stack",
            "network": { "az_count": 2, "nat_gateways": 1 },
            "distributor": { "name": "edge", "port": 80 },
            "cluster": { "name": "services", "discovery_domain": "internal.example" },
            "deployment_units": [{
                "family": "webapp",
                "cpu_units": 256,
                "memory_mib": 512,
                "architecture": "arm64",
                "image": "registry.local/webapp:1.0",
                "ports": [{ "container_port": 80 }]
            }],
            "services": [{
                "name": "web",
                "deployment_unit": "webapp",
                "desired_count": 2,
                "assign_public_ip": true
            }],
            "routes": [{
                "service": "web",
                "container_name": "webapp",
                "container_port": 80,
                "path_patterns": ["/*"],
                "priority": 1
            }]
        }"#
    }

    #[test]
    fn test_parse_and_validate_sample() {
        let config = TopologyConfig::from_json(sample_json()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.network.cidr, "10.0.0.0/16");
        assert_eq!(config.distributor.default_action.status, 200);
        assert_eq!(config.distributor.default_action.body, "no Route defined");
        assert_eq!(config.services[0].startup_window_secs, 60);
        assert!(config.services[0].rollback_on_failure);
    }

    #[test]
    fn test_target_defaults_and_validation() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        assert_eq!(config.target.region, "local");

        config.target.account = String::new();
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = TopologyConfig::from_json("{ not json").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_duplicate_resource_name_conflicts() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        config.services[0].name = "edge".to_string();
        // route now references a missing service, rename it too
        config.routes[0].service = "edge".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_duplicate_route_priority_conflicts() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        let mut second = config.routes[0].clone();
        second.path_patterns = vec!["/admin/*".to_string()];
        config.routes.push(second);
        let err = config.validate().unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_unknown_unit_reference_rejected() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        config.services[0].deployment_unit = "missing".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_unsupported_cpu_memory_rejected() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        config.deployment_units[0].memory_mib = 768;
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_route_port_must_be_exposed() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        config.routes[0].container_port = 8443;
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_invalid_nat_layout_rejected() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        config.network.nat_gateways = 5;
        assert!(config.validate().is_err());

        config.network.nat_gateways = 1;
        config.network.az_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_match_route_prefers_lowest_priority() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        let mut api = config.routes[0].clone();
        api.priority = 2;
        api.path_patterns = vec!["/api/*".to_string()];
        // swap priorities so the catch-all is evaluated last
        config.routes[0].priority = 10;
        config.routes.push(api);

        let matched = config.match_route("/api/users").unwrap();
        assert_eq!(matched.priority, 2);

        let matched = config.match_route("/index.html").unwrap();
        assert_eq!(matched.priority, 10);
    }

    #[test]
    fn test_match_route_none_means_default_action() {
        let mut config = TopologyConfig::from_json(sample_json()).unwrap();
        config.routes[0].path_patterns = vec!["/api/*".to_string()];
        assert!(config.match_route("/elsewhere").is_none());
    }
}

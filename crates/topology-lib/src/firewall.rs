//! Ingress firewall rules attached to network interfaces
//!
//! A firewall is an ordered list of permit rules evaluated against the
//! source address, protocol, and destination port of an inbound
//! connection. Anything not permitted is denied.

use crate::error::{ProvisionError, Result};
use crate::models::Protocol;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// A single ingress permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    source: Ipv4Network,
    protocol: Protocol,
    port: u16,
}

impl IngressRule {
    /// Create a rule from a source CIDR string.
    ///
    /// Fails with a config error when the CIDR does not parse. The port
    /// range invariant is carried by the `u16` type.
    pub fn new(source: &str, protocol: Protocol, port: u16) -> Result<Self> {
        let source = source.parse::<Ipv4Network>().map_err(|e| {
            ProvisionError::config(format!("invalid source CIDR '{}': {}", source, e))
        })?;
        Ok(Self {
            source,
            protocol,
            port,
        })
    }

    /// Permit any IPv4 source on the given protocol and port.
    pub fn any_ipv4(protocol: Protocol, port: u16) -> Self {
        Self {
            source: "0.0.0.0/0".parse().expect("static CIDR"),
            protocol,
            port,
        }
    }

    pub fn source(&self) -> Ipv4Network {
        self.source
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether this rule permits the given connection attempt.
    pub fn permits(&self, source: Ipv4Addr, protocol: Protocol, port: u16) -> bool {
        self.protocol == protocol && self.port == port && self.source.contains(source)
    }
}

/// An ordered set of ingress rules bound to a resource's interfaces.
#[derive(Debug, Clone, Default)]
pub struct Firewall {
    name: String,
    rules: Vec<IngressRule>,
}

impl Firewall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Append an ingress rule.
    pub fn add_ingress(mut self, rule: IngressRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[IngressRule] {
        &self.rules
    }

    /// Whether any rule permits the given connection attempt.
    pub fn permits(&self, source: Ipv4Addr, protocol: Protocol, port: u16) -> bool {
        self.rules.iter().any(|r| r.permits(source, protocol, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_cidr_is_config_error() {
        let err = IngressRule::new("300.0.0.0/8", Protocol::Tcp, 80).unwrap_err();
        assert!(err.is_config());

        let err = IngressRule::new("10.0.0.0/40", Protocol::Tcp, 80).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_any_ipv4_permits_everything_on_port() {
        let rule = IngressRule::any_ipv4(Protocol::Tcp, 80);
        assert!(rule.permits("203.0.113.7".parse().unwrap(), Protocol::Tcp, 80));
        assert!(!rule.permits("203.0.113.7".parse().unwrap(), Protocol::Tcp, 443));
        assert!(!rule.permits("203.0.113.7".parse().unwrap(), Protocol::Udp, 80));
    }

    #[test]
    fn test_scoped_source_cidr() {
        let rule = IngressRule::new("10.1.0.0/16", Protocol::Tcp, 8080).unwrap();
        assert!(rule.permits("10.1.200.4".parse().unwrap(), Protocol::Tcp, 8080));
        assert!(!rule.permits("10.2.0.4".parse().unwrap(), Protocol::Tcp, 8080));
    }

    #[test]
    fn test_firewall_union_of_rules() {
        let firewall = Firewall::new("edge-sg")
            .add_ingress(IngressRule::any_ipv4(Protocol::Tcp, 80))
            .add_ingress(IngressRule::new("10.0.0.0/8", Protocol::Tcp, 9090).unwrap());

        assert!(firewall.permits("198.51.100.1".parse().unwrap(), Protocol::Tcp, 80));
        assert!(firewall.permits("10.3.3.3".parse().unwrap(), Protocol::Tcp, 9090));
        assert!(!firewall.permits("198.51.100.1".parse().unwrap(), Protocol::Tcp, 9090));
    }
}

//! Traffic distributor: the public entry point and its routing rules
//!
//! A distributor accepts inbound connections on its listeners. Each
//! listener owns an ordered rule set: rules are evaluated in ascending
//! priority, the first rule whose path pattern set matches wins, and a
//! fixed default action answers when nothing matches. Rule priorities
//! are unique per listener; a duplicate is rejected without touching
//! the existing rule set.

use crate::error::{ProvisionError, Result};
use crate::firewall::Firewall;
use crate::models::HealthCheck;
use crate::network::Network;
use crate::registration::TargetPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Address family served by a distributor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpAddressType {
    #[default]
    Ipv4,
    DualStack,
}

impl IpAddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpAddressType::Ipv4 => "ipv4",
            IpAddressType::DualStack => "dualstack",
        }
    }
}

/// Fixed response returned when no routing rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedResponse {
    pub status: u16,
    pub body: String,
}

impl FixedResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// A request path pattern, exact or with a trailing `/*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
}

impl PathPattern {
    /// Parse and validate a pattern.
    ///
    /// Patterns must start with `/`. A single `*` is allowed, and only
    /// as the final character of a trailing `/*`.
    pub fn new(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(ProvisionError::config(format!(
                "path pattern '{}' must start with '/'",
                pattern
            )));
        }
        if pattern.chars().any(char::is_whitespace) {
            return Err(ProvisionError::config(format!(
                "path pattern '{}' contains whitespace",
                pattern
            )));
        }
        let stars = pattern.matches('*').count();
        if stars > 1 || (stars == 1 && !pattern.ends_with("/*")) {
            return Err(ProvisionError::config(format!(
                "path pattern '{}' may only use a trailing '/*' wildcard",
                pattern
            )));
        }
        Ok(Self {
            raw: pattern.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern matches a request path. A trailing `/*`
    /// matches any suffix under the prefix; otherwise the match is
    /// exact.
    pub fn matches(&self, path: &str) -> bool {
        match self.raw.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == self.raw,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// One path-based routing rule bound to a target pool.
#[derive(Clone)]
pub struct RoutingRule {
    pub priority: u32,
    pub patterns: Vec<PathPattern>,
    pub pool: Arc<TargetPool>,
    pub health_check: HealthCheck,
}

impl RoutingRule {
    fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Outcome of evaluating a listener's rules against a request path.
#[derive(Clone)]
pub enum RouteDecision {
    /// The lowest-priority matching rule forwards to its pool.
    Forward {
        priority: u32,
        pool: Arc<TargetPool>,
    },
    /// No rule matched; the listener's default action applies.
    Default(FixedResponse),
}

/// A listening port with an ordered rule set and a default action.
pub struct Listener {
    port: u16,
    default_action: FixedResponse,
    rules: RwLock<BTreeMap<u32, RoutingRule>>,
}

impl Listener {
    pub(crate) fn new(port: u16, default_action: FixedResponse) -> Self {
        Self {
            port,
            default_action,
            rules: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn default_action(&self) -> &FixedResponse {
        &self.default_action
    }

    /// Attach a routing rule.
    ///
    /// Fails with a conflict when the priority is already in use; the
    /// existing rule set is left unchanged. Priority zero is rejected
    /// as rules are ordered by positive priority.
    pub async fn add_rule(
        &self,
        priority: u32,
        patterns: Vec<PathPattern>,
        pool: Arc<TargetPool>,
        health_check: HealthCheck,
    ) -> Result<()> {
        if priority == 0 {
            return Err(ProvisionError::config(
                "routing rule priority must be a positive integer",
            ));
        }
        if patterns.is_empty() {
            return Err(ProvisionError::config(
                "routing rule needs at least one path pattern",
            ));
        }

        let mut rules = self.rules.write().await;
        if rules.contains_key(&priority) {
            return Err(ProvisionError::conflict(format!(
                "routing priority {} is already in use on listener :{}",
                priority, self.port
            )));
        }

        info!(
            listener_port = self.port,
            priority = priority,
            pool = %pool.name(),
            "Routing rule attached"
        );
        rules.insert(
            priority,
            RoutingRule {
                priority,
                patterns,
                pool,
                health_check,
            },
        );
        Ok(())
    }

    /// Detach the rule with the given priority, returning it.
    pub async fn remove_rule(&self, priority: u32) -> Option<RoutingRule> {
        let mut rules = self.rules.write().await;
        let removed = rules.remove(&priority);
        if removed.is_some() {
            info!(
                listener_port = self.port,
                priority = priority,
                "Routing rule detached"
            );
        }
        removed
    }

    /// Evaluate rules in ascending priority order; the first match
    /// wins, the default action answers otherwise.
    pub async fn route(&self, path: &str) -> RouteDecision {
        let rules = self.rules.read().await;
        for rule in rules.values() {
            if rule.matches(path) {
                return RouteDecision::Forward {
                    priority: rule.priority,
                    pool: rule.pool.clone(),
                };
            }
        }
        RouteDecision::Default(self.default_action.clone())
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Rules snapshot in priority order, for descriptions and teardown.
    pub async fn rules(&self) -> Vec<RoutingRule> {
        self.rules.read().await.values().cloned().collect()
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("port", &self.port)
            .field("default_action", &self.default_action)
            .finish()
    }
}

/// The internet-facing load balancer owning one listener per port.
pub struct Distributor {
    name: String,
    network: Arc<Network>,
    firewall: Firewall,
    internet_facing: bool,
    ip_address_type: IpAddressType,
    deletion_protection: bool,
    listeners: RwLock<Vec<Arc<Listener>>>,
    created_at: DateTime<Utc>,
}

impl Distributor {
    pub fn new(network: Arc<Network>, name: impl Into<String>, firewall: Firewall) -> Self {
        Self {
            name: name.into(),
            network,
            firewall,
            internet_facing: true,
            ip_address_type: IpAddressType::Ipv4,
            deletion_protection: false,
            listeners: RwLock::new(Vec::new()),
            created_at: Utc::now(),
        }
    }

    /// Make the distributor reachable only from inside the network.
    pub fn internal(mut self) -> Self {
        self.internet_facing = false;
        self
    }

    pub fn with_ip_address_type(mut self, ip_address_type: IpAddressType) -> Self {
        self.ip_address_type = ip_address_type;
        self
    }

    pub fn with_deletion_protection(mut self, enabled: bool) -> Self {
        self.deletion_protection = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    pub fn internet_facing(&self) -> bool {
        self.internet_facing
    }

    pub fn ip_address_type(&self) -> IpAddressType {
        self.ip_address_type
    }

    pub fn deletion_protection(&self) -> bool {
        self.deletion_protection
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Open a listener on a port with its mandatory default action.
    /// One listener per port; a duplicate port is a conflict.
    pub async fn add_listener(
        &self,
        port: u16,
        default_action: FixedResponse,
    ) -> Result<Arc<Listener>> {
        let mut listeners = self.listeners.write().await;
        if listeners.iter().any(|l| l.port() == port) {
            return Err(ProvisionError::conflict(format!(
                "listener on port {} already exists for distributor '{}'",
                port, self.name
            )));
        }

        let listener = Arc::new(Listener::new(port, default_action));
        listeners.push(listener.clone());
        info!(
            distributor = %self.name,
            port = port,
            "Listener opened"
        );
        Ok(listener)
    }

    pub async fn listener(&self, port: u16) -> Option<Arc<Listener>> {
        let listeners = self.listeners.read().await;
        listeners.iter().find(|l| l.port() == port).cloned()
    }

    pub async fn listeners(&self) -> Vec<Arc<Listener>> {
        self.listeners.read().await.clone()
    }
}

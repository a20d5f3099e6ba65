//! Observability infrastructure for topology provisioning
//!
//! Provides:
//! - Prometheus metrics (provisioning latency, resource counts, service
//!   states, rollbacks)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_gauge, register_int_gauge_vec, GaugeVec,
    Histogram, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for provisioning latency (in seconds).
const PROVISION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Service states tracked in the state-info gauge.
const SERVICE_STATES: &[&str] = &["pending", "steady", "degraded", "rolling_back", "failed"];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<TopologyMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct TopologyMetricsInner {
    provision_latency_seconds: Histogram,
    resources: IntGaugeVec,
    service_state_info: GaugeVec,
    routing_rules: IntGauge,
    rollbacks_total: IntGauge,
    replica_restarts_total: IntGauge,
}

impl TopologyMetricsInner {
    fn new() -> Self {
        Self {
            provision_latency_seconds: register_histogram!(
                "topology_provision_latency_seconds",
                "Time spent provisioning a full topology",
                PROVISION_BUCKETS.to_vec()
            )
            .expect("Failed to register provision_latency_seconds"),

            resources: register_int_gauge_vec!(
                "topology_resources",
                "Number of provisioned resources by kind",
                &["kind"]
            )
            .expect("Failed to register resources"),

            service_state_info: register_gauge_vec!(
                "topology_service_state_info",
                "Current state of each supervised service",
                &["service", "state"]
            )
            .expect("Failed to register service_state_info"),

            routing_rules: register_int_gauge!(
                "topology_routing_rules",
                "Number of routing rules attached to listeners"
            )
            .expect("Failed to register routing_rules"),

            rollbacks_total: register_int_gauge!(
                "topology_rollbacks_total",
                "Total number of deployment rollbacks triggered"
            )
            .expect("Failed to register rollbacks_total"),

            replica_restarts_total: register_int_gauge!(
                "topology_replica_restarts_total",
                "Total number of replicas restarted by supervisors"
            )
            .expect("Failed to register replica_restarts_total"),
        }
    }
}

/// Topology metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct TopologyMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for TopologyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(TopologyMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &TopologyMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a full-topology provisioning latency observation
    pub fn observe_provision_latency(&self, duration_secs: f64) {
        self.inner().provision_latency_seconds.observe(duration_secs);
    }

    /// Update the resource count for a kind
    pub fn set_resource_count(&self, kind: &str, count: i64) {
        self.inner().resources.with_label_values(&[kind]).set(count);
    }

    /// Publish the current state of a service (one-hot across states)
    pub fn set_service_state(&self, service: &str, state: &str) {
        for s in SERVICE_STATES {
            let value = if *s == state { 1.0 } else { 0.0 };
            self.inner()
                .service_state_info
                .with_label_values(&[service, s])
                .set(value);
        }
    }

    /// Update the routing rule count
    pub fn set_routing_rules(&self, count: i64) {
        self.inner().routing_rules.set(count);
    }

    /// Increment the rollback counter
    pub fn inc_rollbacks(&self) {
        self.inner().rollbacks_total.inc();
    }

    /// Increment the replica restart counter
    pub fn inc_replica_restarts(&self) {
        self.inner().replica_restarts_total.inc();
    }
}

/// Structured logger for provisioning events
///
/// Provides consistent JSON-formatted logging for resource lifecycle
/// and deployment events.
#[derive(Clone)]
pub struct ProvisionLogger {
    topology: String,
}

impl ProvisionLogger {
    pub fn new(topology: impl Into<String>) -> Self {
        Self {
            topology: topology.into(),
        }
    }

    /// Log a resource reaching ready status
    pub fn log_resource_ready(&self, kind: &str, name: &str) {
        info!(
            event = "resource_ready",
            topology = %self.topology,
            kind = %kind,
            name = %name,
            "Resource provisioned"
        );
    }

    /// Log a service state transition
    pub fn log_state_change(&self, service: &str, from: &str, to: &str) {
        info!(
            event = "service_state_change",
            topology = %self.topology,
            service = %service,
            from = %from,
            to = %to,
            "Service state changed"
        );
    }

    /// Log a deployment rollback
    pub fn log_rollback(&self, service: &str, from_revision: u32, to_revision: u32, success: bool) {
        if success {
            info!(
                event = "deployment_rolled_back",
                topology = %self.topology,
                service = %service,
                from_revision = from_revision,
                to_revision = to_revision,
                "Deployment rolled back to previous revision"
            );
        } else {
            warn!(
                event = "deployment_rollback_failed",
                topology = %self.topology,
                service = %service,
                from_revision = from_revision,
                to_revision = to_revision,
                "Rollback did not converge, operator action required"
            );
        }
    }

    /// Log daemon startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "provisioner_started",
            topology = %self.topology,
            version = %version,
            "Topology provisioner started"
        );
    }

    /// Log daemon shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "provisioner_shutdown",
            topology = %self.topology,
            reason = %reason,
            "Topology provisioner shutting down"
        );
    }
}

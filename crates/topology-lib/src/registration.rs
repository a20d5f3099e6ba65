//! Routing registration: binding a service to public traffic
//!
//! Registration is the one step that couples a service to the traffic
//! distributor. It creates a target pool fed by the service's replica
//! endpoints and atomically installs a routing rule on the listener; a
//! priority collision leaves no pool behind. A service with no
//! registration stays reachable only through its cluster's discovery
//! namespace.

use crate::distributor::{Listener, PathPattern};
use crate::error::{ProvisionError, Result};
use crate::models::HealthCheck;
use crate::service::Service;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Backend group a routing rule forwards matched traffic to.
///
/// The pool tracks the owning service's replica endpoints through a
/// watch channel, so replica churn propagates without re-registration.
pub struct TargetPool {
    name: String,
    service: String,
    container_name: String,
    container_port: u16,
    health_check: HealthCheck,
    endpoints_rx: watch::Receiver<Vec<Ipv4Addr>>,
}

impl TargetPool {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the service this pool is bound to.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn container_port(&self) -> u16 {
        self.container_port
    }

    pub fn health_check(&self) -> &HealthCheck {
        &self.health_check
    }

    /// Current backend addresses on the pool's container port.
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.endpoints_rx
            .borrow()
            .iter()
            .map(|ip| SocketAddr::from((*ip, self.container_port)))
            .collect()
    }

    /// Pool with a fixed, empty endpoint set for rule-level tests.
    #[cfg(test)]
    pub(crate) fn fixed(name: &str) -> Arc<Self> {
        let (_tx, rx) = watch::channel(Vec::new());
        Arc::new(Self {
            name: name.to_string(),
            service: format!("{}-svc", name),
            container_name: name.to_string(),
            container_port: 80,
            health_check: HealthCheck::default(),
            endpoints_rx: rx,
        })
    }
}

impl fmt::Debug for TargetPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetPool")
            .field("name", &self.name)
            .field("service", &self.service)
            .field("container_port", &self.container_port)
            .finish()
    }
}

/// Create a target pool for a service's replicas and attach a routing
/// rule on the listener pointing at it.
///
/// The health check path defaults to `/` when not supplied. Fails with
/// a conflict when the priority is already taken on the listener; in
/// that case the existing rule set is untouched and the pool is
/// discarded.
pub async fn register_targets(
    service: &Arc<Service>,
    container_name: &str,
    container_port: u16,
    listener: &Arc<Listener>,
    path_patterns: Vec<PathPattern>,
    priority: u32,
    health_check_path: Option<&str>,
) -> Result<Arc<TargetPool>> {
    let unit = service.current_unit().await;
    if !unit.exposes_port(container_port) {
        return Err(ProvisionError::config(format!(
            "container port {} is not exposed by deployment unit '{}'",
            container_port,
            unit.qualified_name()
        )));
    }

    let health_check = match health_check_path {
        Some(path) => HealthCheck::with_path(path),
        None => HealthCheck::default(),
    };

    let pool = Arc::new(TargetPool {
        name: format!("{}-{}-pool", service.name(), priority),
        service: service.name().to_string(),
        container_name: container_name.to_string(),
        container_port,
        health_check: health_check.clone(),
        endpoints_rx: service.subscribe_endpoints(),
    });

    // rule installation is the commit point: on conflict the pool is
    // dropped and nothing stays attached
    listener
        .add_rule(priority, path_patterns, pool.clone(), health_check.clone())
        .await?;

    service.set_health_path(&health_check.path).await;

    info!(
        service = %service.name(),
        pool = %pool.name,
        listener_port = listener.port(),
        priority = priority,
        "Service registered with traffic distributor"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::deployment::DeploymentUnitBuilder;
    use crate::distributor::{FixedResponse, RouteDecision};
    use crate::firewall::Firewall;
    use crate::models::Protocol;
    use crate::network::Network;
    use crate::providers::StaticProber;
    use crate::service::{ServiceSettings, ServiceState};
    use std::time::Duration;

    async fn launch_service(name: &str) -> Arc<Service> {
        let network = Arc::new(
            Network::create("vpc", "10.0.0.0/16".parse().unwrap(), 2, 1).unwrap(),
        );
        let cluster = Arc::new(Cluster::new(network, "services"));
        let unit = Arc::new(
            DeploymentUnitBuilder::new("webapp")
                .image("registry.local/webapp:1.0")
                .port(80, Protocol::Tcp)
                .build()
                .unwrap(),
        );
        let settings = ServiceSettings {
            desired_count: 2,
            startup_window: Duration::from_secs(2),
            supervision_interval: Duration::from_millis(10),
            ..ServiceSettings::default()
        };
        let service = Service::launch(
            name,
            cluster,
            unit,
            settings,
            Firewall::new(format!("{}-sg", name)),
            Arc::new(StaticProber::healthy()),
        )
        .await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();
        service
    }

    fn listener() -> Arc<Listener> {
        // distributor-less listener is enough for registration tests
        Arc::new(Listener::new(80, FixedResponse::new(200, "no Route defined")))
    }

    fn patterns(raw: &[&str]) -> Vec<PathPattern> {
        raw.iter().map(|p| PathPattern::new(p).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_register_defaults_health_check_path() {
        let service = launch_service("web").await;
        let listener = listener();

        let pool = register_targets(
            &service,
            "webapp",
            80,
            &listener,
            patterns(&["/*"]),
            1,
            None,
        )
        .await
        .unwrap();

        assert_eq!(pool.health_check().path, "/");
        service.stop().await;
    }

    #[tokio::test]
    async fn test_register_with_explicit_health_check_path() {
        let service = launch_service("web").await;
        let listener = listener();

        let pool = register_targets(
            &service,
            "webapp",
            80,
            &listener,
            patterns(&["/*"]),
            1,
            Some("/health"),
        )
        .await
        .unwrap();

        assert_eq!(pool.health_check().path, "/health");
        service.stop().await;
    }

    #[tokio::test]
    async fn test_pool_tracks_replica_endpoints() {
        let service = launch_service("web").await;
        let listener = listener();

        let pool = register_targets(
            &service,
            "webapp",
            80,
            &listener,
            patterns(&["/*"]),
            1,
            None,
        )
        .await
        .unwrap();

        let endpoints = pool.endpoints();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.iter().all(|e| e.port() == 80));

        // scale down propagates through the watch channel
        service.set_desired_count(1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.endpoints().len(), 1);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_priority_conflict_leaves_no_pool_attached() {
        let web = launch_service("web").await;
        let admin = launch_service("admin").await;
        let listener = listener();

        register_targets(&web, "webapp", 80, &listener, patterns(&["/*"]), 1, None)
            .await
            .unwrap();

        let err = register_targets(
            &admin,
            "webapp",
            80,
            &listener,
            patterns(&["/admin/*"]),
            1,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(listener.rule_count().await, 1);

        // the surviving rule still points at the first service's pool
        match listener.route("/admin/users").await {
            RouteDecision::Forward { pool, .. } => assert_eq!(pool.service(), "web"),
            RouteDecision::Default(_) => panic!("expected forward"),
        }
        web.stop().await;
        admin.stop().await;
    }

    #[tokio::test]
    async fn test_unexposed_port_rejected() {
        let service = launch_service("web").await;
        let listener = listener();

        let err = register_targets(
            &service,
            "webapp",
            9999,
            &listener,
            patterns(&["/*"]),
            1,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.is_config());
        assert_eq!(listener.rule_count().await, 0);
        service.stop().await;
    }
}

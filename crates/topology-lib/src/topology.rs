//! Topology construction: from a declaration to running resources
//!
//! `build_topology` turns a validated `TopologyConfig` into a live
//! resource graph. Dependencies are typed constructor arguments, not a
//! runtime graph walker: independent resources provision concurrently,
//! and every dependent step blocks on the status registry until what it
//! references is ready. Each creation step commits independently; a
//! failure partway leaves earlier resources intact.

use crate::cluster::Cluster;
use crate::config::{IngressRuleConfig, TopologyConfig};
use crate::deployment::{DeploymentUnit, DeploymentUnitBuilder};
use crate::distributor::{Distributor, FixedResponse, Listener, PathPattern};
use crate::error::{ProvisionError, Result};
use crate::firewall::{Firewall, IngressRule};
use crate::models::{LogConfig, Protocol};
use crate::network::Network;
use crate::observability::TopologyMetrics;
use crate::providers::Providers;
use crate::registration::{register_targets, TargetPool};
use crate::service::{Service, ServiceSettings, ServiceState};
use crate::status::StatusRegistry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Kinds of resources a topology declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Distributor,
    Listener,
    Cluster,
    DeploymentUnit,
    Service,
    TargetPool,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Distributor => "distributor",
            ResourceKind::Listener => "listener",
            ResourceKind::Cluster => "cluster",
            ResourceKind::DeploymentUnit => "deployment_unit",
            ResourceKind::Service => "service",
            ResourceKind::TargetPool => "target_pool",
        }
    }
}

/// Global resource-name registry. Concurrent creation attempts for the
/// same name serialize on the map shard; the loser gets a conflict.
struct NameRegistry {
    names: DashMap<String, ResourceKind>,
}

impl NameRegistry {
    fn new() -> Self {
        Self {
            names: DashMap::new(),
        }
    }

    fn claim(&self, name: &str, kind: ResourceKind) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.names.entry(name.to_string()) {
            Entry::Occupied(existing) => Err(ProvisionError::conflict(format!(
                "resource name '{}' is already in use by a {}",
                name,
                existing.get().as_str()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(kind);
                Ok(())
            }
        }
    }
}

/// Structural description of one resource, free of provider-assigned
/// identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub name: String,
    pub kind: ResourceKind,
    pub depends_on: Vec<String>,
    pub detail: String,
}

/// Structural description of one routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescription {
    pub priority: u32,
    pub patterns: Vec<String>,
    pub service: String,
    pub pool: String,
    pub health_check_path: String,
}

/// The entity graph of a built topology. Two builds from the same
/// config produce equal descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescription {
    pub name: String,
    pub resources: Vec<ResourceDescription>,
    pub routes: Vec<RouteDescription>,
}

/// A service's routing registration, kept for ordered teardown.
pub struct Registration {
    pub service: String,
    pub priority: u32,
    pub pool: Arc<TargetPool>,
}

/// Handle to a fully provisioned topology.
pub struct TopologyHandle {
    name: String,
    network: Arc<Network>,
    distributor: Arc<Distributor>,
    listener: Arc<Listener>,
    cluster: Arc<Cluster>,
    units: BTreeMap<String, Arc<DeploymentUnit>>,
    services: BTreeMap<String, Arc<Service>>,
    registrations: Vec<Registration>,
    status: StatusRegistry,
}

impl std::fmt::Debug for TopologyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyHandle")
            .field("name", &self.name)
            .field("services", &self.services.len())
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

impl TopologyHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }

    pub fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn unit(&self, family: &str) -> Option<&Arc<DeploymentUnit>> {
        self.units.get(family)
    }

    pub fn service(&self, name: &str) -> Option<&Arc<Service>> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn status(&self) -> &StatusRegistry {
        &self.status
    }

    fn listener_name(&self) -> String {
        format!("{}:{}", self.distributor.name(), self.listener.port())
    }

    /// Structural description of the entity graph: names, kinds, and
    /// dependency edges, stable across identical builds.
    pub async fn describe(&self) -> TopologyDescription {
        let mut resources = Vec::new();

        let network = &self.network;
        resources.push(ResourceDescription {
            name: network.name().to_string(),
            kind: ResourceKind::Network,
            depends_on: Vec::new(),
            detail: format!(
                "cidr {}, {} azs, {} nat gateways",
                network.cidr(),
                network.az_count(),
                network.nat_gateway_count()
            ),
        });

        resources.push(ResourceDescription {
            name: self.distributor.name().to_string(),
            kind: ResourceKind::Distributor,
            depends_on: vec![network.name().to_string()],
            detail: format!(
                "{}, {}",
                if self.distributor.internet_facing() {
                    "internet-facing"
                } else {
                    "internal"
                },
                self.distributor.ip_address_type().as_str()
            ),
        });

        let default = self.listener.default_action();
        resources.push(ResourceDescription {
            name: self.listener_name(),
            kind: ResourceKind::Listener,
            depends_on: vec![self.distributor.name().to_string()],
            detail: format!("default fixed response {} '{}'", default.status, default.body),
        });

        let domain = self
            .cluster
            .namespace()
            .await
            .map(|n| n.domain().to_string());
        resources.push(ResourceDescription {
            name: self.cluster.name().to_string(),
            kind: ResourceKind::Cluster,
            depends_on: vec![network.name().to_string()],
            detail: match domain {
                Some(domain) => format!("discovery domain {}", domain),
                None => "no discovery namespace".to_string(),
            },
        });

        for (family, unit) in &self.units {
            resources.push(ResourceDescription {
                name: family.clone(),
                kind: ResourceKind::DeploymentUnit,
                depends_on: Vec::new(),
                detail: format!(
                    "{} cpu / {} MiB, {}/{}, image {}",
                    unit.cpu_units(),
                    unit.memory_mib(),
                    unit.platform().architecture,
                    unit.platform().os_family,
                    unit.image()
                ),
            });
        }

        for (name, service) in &self.services {
            let unit = service.current_unit().await;
            resources.push(ResourceDescription {
                name: name.clone(),
                kind: ResourceKind::Service,
                depends_on: vec![
                    self.cluster.name().to_string(),
                    unit.family().to_string(),
                ],
                detail: format!(
                    "desired {}, rollback {}, public ip {}",
                    service.settings().desired_count,
                    service.settings().rollback_on_failure,
                    service.settings().assign_public_ip
                ),
            });
        }

        for registration in &self.registrations {
            resources.push(ResourceDescription {
                name: registration.pool.name().to_string(),
                kind: ResourceKind::TargetPool,
                depends_on: vec![registration.service.clone(), self.listener_name()],
                detail: format!(
                    "container {} port {}, health {}",
                    registration.pool.container_name(),
                    registration.pool.container_port(),
                    registration.pool.health_check().path
                ),
            });
        }

        resources.sort_by(|a, b| a.name.cmp(&b.name));

        let routes = self
            .listener
            .rules()
            .await
            .into_iter()
            .map(|rule| RouteDescription {
                priority: rule.priority,
                patterns: rule.patterns.iter().map(|p| p.as_str().to_string()).collect(),
                service: rule.pool.service().to_string(),
                pool: rule.pool.name().to_string(),
                health_check_path: rule.health_check.path.clone(),
            })
            .collect();

        TopologyDescription {
            name: self.name.clone(),
            resources,
            routes,
        }
    }

    /// Tear the topology down in dependency order: routing rules and
    /// services first, the distributor and cluster after.
    ///
    /// Refused while the distributor's deletion protection is on.
    pub async fn teardown(&self) -> Result<()> {
        if self.distributor.deletion_protection() {
            return Err(ProvisionError::config(format!(
                "deletion protection is enabled on distributor '{}'",
                self.distributor.name()
            )));
        }

        for registration in &self.registrations {
            self.listener.remove_rule(registration.priority).await;
        }
        for service in self.services.values() {
            service.stop().await;
        }

        info!(topology = %self.name, "Topology torn down");
        Ok(())
    }
}

/// Build a firewall from config rules, opening the fallback ports to
/// any IPv4 source when no rule is declared.
fn build_firewall(
    name: &str,
    rules: &[IngressRuleConfig],
    fallback_ports: &[u16],
) -> Result<Firewall> {
    let mut firewall = Firewall::new(name);
    if rules.is_empty() {
        for port in fallback_ports {
            firewall = firewall.add_ingress(IngressRule::any_ipv4(Protocol::Tcp, *port));
        }
    } else {
        for rule in rules {
            firewall = firewall.add_ingress(rule.build()?);
        }
    }
    Ok(firewall)
}

/// Provision a complete topology from its declaration.
///
/// Validation runs first, so every config error surfaces before any
/// resource is created. There is no global rollback: on a later-step
/// failure, already-created resources remain until torn down.
pub async fn build_topology(
    config: &TopologyConfig,
    providers: &Providers,
) -> Result<TopologyHandle> {
    config.validate()?;

    let metrics = TopologyMetrics::new();
    let started = std::time::Instant::now();
    let names = NameRegistry::new();
    let status = StatusRegistry::new();

    info!(
        topology = %config.name,
        account = %config.target.account,
        region = %config.target.region,
        "Provisioning topology"
    );

    // network is the root of the graph
    let network_name = config.network.name.clone();
    names.claim(&network_name, ResourceKind::Network)?;
    status.register(&network_name).await;
    let cidr = config
        .network
        .cidr
        .parse()
        .map_err(|e| ProvisionError::config(format!("invalid network CIDR: {}", e)))?;
    let network = Arc::new(Network::create(
        &network_name,
        cidr,
        config.network.az_count,
        config.network.nat_gateways,
    )?);
    status.set_ready(&network_name).await;
    info!(network = %network_name, cidr = %network.cidr(), "Network ready");

    // distributor and cluster are independent of each other; both gate
    // on the network being ready
    let (distributor_result, cluster_result) = tokio::join!(
        async {
            status.await_ready(&network_name).await?;
            let dc = &config.distributor;
            names.claim(&dc.name, ResourceKind::Distributor)?;
            status.register(&dc.name).await;

            let firewall = build_firewall(&format!("{}-sg", dc.name), &dc.ingress, &[dc.port])?;
            let mut distributor = Distributor::new(network.clone(), &dc.name, firewall)
                .with_deletion_protection(dc.deletion_protection);
            if !dc.internet_facing {
                distributor = distributor.internal();
            }
            let distributor = Arc::new(distributor);

            let listener = distributor
                .add_listener(
                    dc.port,
                    FixedResponse::new(dc.default_action.status, dc.default_action.body.clone()),
                )
                .await?;
            status.set_ready(&dc.name).await;
            Ok::<_, ProvisionError>((distributor, listener))
        },
        async {
            status.await_ready(&network_name).await?;
            let cc = &config.cluster;
            names.claim(&cc.name, ResourceKind::Cluster)?;
            status.register(&cc.name).await;

            let cluster = Arc::new(
                Cluster::new(network.clone(), &cc.name)
                    .with_container_insights(cc.container_insights),
            );
            if let Some(domain) = &cc.discovery_domain {
                cluster
                    .attach_discovery_namespace(domain, providers.discovery.clone())
                    .await?;
            }
            status.set_ready(&cc.name).await;
            Ok::<_, ProvisionError>(cluster)
        }
    );
    let (distributor, listener) = distributor_result?;
    let cluster = cluster_result?;

    // deployment units are independent of everything above; resolve
    // their images and log bindings concurrently
    for unit_config in &config.deployment_units {
        names.claim(&unit_config.family, ResourceKind::DeploymentUnit)?;
        status.register(&unit_config.family).await;
    }

    let mut unit_tasks = tokio::task::JoinSet::new();
    for unit_config in config.deployment_units.clone() {
        let image_registry = providers.image_registry.clone();
        let log_store = providers.log_store.clone();
        unit_tasks.spawn(async move {
            let artifact = image_registry.resolve(&unit_config.image).await?;
            let stream_prefix = if unit_config.log.stream_prefix.is_empty() {
                format!("{}-logs", unit_config.family)
            } else {
                unit_config.log.stream_prefix.clone()
            };
            let binding = log_store
                .create_stream(&stream_prefix, unit_config.log.retention_days)
                .await?;

            let unit = DeploymentUnitBuilder::new(&unit_config.family)
                .cpu_units(unit_config.cpu_units)
                .memory_mib(unit_config.memory_mib)
                .architecture(unit_config.architecture)
                .os_family(unit_config.os_family)
                .image(&unit_config.image)
                .image_digest(artifact.digest)
                .log(LogConfig {
                    stream_prefix: binding.stream_prefix,
                    retention_days: binding.retention_days,
                })
                .ports(unit_config.ports.clone())
                .build()?;
            Ok::<DeploymentUnit, ProvisionError>(unit)
        });
    }

    let mut units = BTreeMap::new();
    while let Some(joined) = unit_tasks.join_next().await {
        let unit = joined
            .map_err(|e| ProvisionError::dependency("runtime", e.to_string()))??;
        status.set_ready(unit.family()).await;
        info!(unit = %unit.qualified_name(), "Deployment unit ready");
        units.insert(unit.family().to_string(), Arc::new(unit));
    }

    // services gate on the cluster and their deployment unit
    let mut services: BTreeMap<String, Arc<Service>> = BTreeMap::new();
    for service_config in &config.services {
        status.await_ready(&config.cluster.name).await?;
        status.await_ready(&service_config.deployment_unit).await?;

        let unit = units
            .get(&service_config.deployment_unit)
            .expect("unit readiness already awaited")
            .clone();

        names.claim(&service_config.name, ResourceKind::Service)?;
        status.register(&service_config.name).await;

        let ports: Vec<u16> = unit.ports().iter().map(|p| p.container_port).collect();
        let firewall = build_firewall(
            &format!("{}-sg", service_config.name),
            &service_config.ingress,
            &ports,
        )?;

        let settings = ServiceSettings {
            desired_count: service_config.desired_count,
            rollback_on_failure: service_config.rollback_on_failure,
            assign_public_ip: service_config.assign_public_ip,
            startup_window: Duration::from_secs(service_config.startup_window_secs),
            supervision_interval: Duration::from_millis(service_config.supervision_interval_ms),
        };

        let service = Service::launch(
            &service_config.name,
            cluster.clone(),
            unit,
            settings,
            firewall,
            providers.prober.clone(),
        )
        .await;

        match service
            .await_state(ServiceState::Steady, settings.startup_window)
            .await
        {
            Ok(()) => status.set_ready(&service_config.name).await,
            Err(e) => {
                // the service stays provisioned but degraded; no
                // automatic rollback exists for an initial deployment
                status
                    .set_degraded(&service_config.name, "did not reach steady state")
                    .await;
                warn!(service = %service_config.name, error = %e, "Service did not converge");
                return Err(e);
            }
        }

        sync_service_status(&service, status.clone());
        services.insert(service_config.name.clone(), service);
    }

    // routing registrations gate on their service and the listener
    let mut registrations = Vec::new();
    for route in &config.routes {
        status.await_ready(&route.service).await?;
        status.await_ready(&config.distributor.name).await?;

        let service = services
            .get(&route.service)
            .expect("service readiness already awaited");
        let patterns = route
            .path_patterns
            .iter()
            .map(|p| PathPattern::new(p))
            .collect::<Result<Vec<_>>>()?;

        let pool = register_targets(
            service,
            &route.container_name,
            route.container_port,
            &listener,
            patterns,
            route.priority,
            route.health_check_path.as_deref(),
        )
        .await?;
        names.claim(pool.name(), ResourceKind::TargetPool)?;

        registrations.push(Registration {
            service: route.service.clone(),
            priority: route.priority,
            pool,
        });
    }

    metrics.set_resource_count("network", 1);
    metrics.set_resource_count("distributor", 1);
    metrics.set_resource_count("listener", 1);
    metrics.set_resource_count("cluster", 1);
    metrics.set_resource_count("deployment_unit", units.len() as i64);
    metrics.set_resource_count("service", services.len() as i64);
    metrics.set_resource_count("target_pool", registrations.len() as i64);
    metrics.set_routing_rules(listener.rule_count().await as i64);
    metrics.observe_provision_latency(started.elapsed().as_secs_f64());

    info!(
        topology = %config.name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        services = services.len(),
        "Topology provisioned"
    );

    Ok(TopologyHandle {
        name: config.name.clone(),
        network,
        distributor,
        listener,
        cluster,
        units,
        services,
        registrations,
        status,
    })
}

/// Keep the status registry tracking a service's live state after
/// provisioning: steady maps to ready, failure is terminal, anything
/// else reads as degraded.
fn sync_service_status(service: &Arc<Service>, status: StatusRegistry) {
    let mut rx = service.watch_state();
    let name = service.name().to_string();
    tokio::spawn(async move {
        let mut last = ServiceState::Steady;
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let state = *rx.borrow_and_update();
            if state == last {
                continue;
            }
            last = state;
            match state {
                ServiceState::Steady => status.set_ready(&name).await,
                ServiceState::Failed => status.set_failed(&name, "rollback failed").await,
                other => status.set_degraded(&name, other.as_str()).await,
            }
        }
    });
}

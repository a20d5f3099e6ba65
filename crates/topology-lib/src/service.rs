//! Service supervision: replica enforcement, health, and deployments
//!
//! A service is a horizontally scaled instantiation of a deployment
//! unit inside a cluster. Each service owns a supervisor task that
//! continuously reconciles the replica set against the desired count,
//! probes replica health, and publishes state transitions on a watch
//! channel. Deployments swap the unit revision and wait for the
//! supervisor to converge; a revision that misses its startup window is
//! rolled back when the service's rollback flag is set.

use crate::cluster::{Cluster, DiscoveryNamespace};
use crate::deployment::DeploymentUnit;
use crate::error::{ProvisionError, Result};
use crate::firewall::Firewall;
use crate::models::DEFAULT_HEALTH_CHECK_PATH;
use crate::observability::TopologyMetrics;
use crate::providers::HealthProber;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

/// Lifecycle states of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Replicas starting; the service has never been steady.
    Pending,
    /// Desired equals running and every replica is healthy.
    Steady,
    /// Some replicas are unhealthy or the set has drifted.
    Degraded,
    /// A failed deployment is being rolled back to the prior revision.
    RollingBack,
    /// A rollback failed to converge; operator action required.
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Pending => "pending",
            ServiceState::Steady => "steady",
            ServiceState::Degraded => "degraded",
            ServiceState::RollingBack => "rolling_back",
            ServiceState::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// The new revision reached steady state.
    Deployed,
    /// The new revision missed its window; the prior revision was
    /// restored and is steady again.
    RolledBack,
}

/// Tunables for a service instance.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub desired_count: u32,
    pub rollback_on_failure: bool,
    /// Give each replica a publicly routable address in addition to its
    /// private one. Has no effect on distributor routing.
    pub assign_public_ip: bool,
    /// How long a new revision gets to reach steady state.
    pub startup_window: Duration,
    /// Supervisor reconciliation interval.
    pub supervision_interval: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            desired_count: 1,
            rollback_on_failure: true,
            assign_public_ip: false,
            startup_window: Duration::from_secs(60),
            supervision_interval: Duration::from_secs(1),
        }
    }
}

/// A single running copy of the deployment unit.
#[derive(Debug, Clone)]
pub struct Replica {
    pub index: u64,
    pub revision: u32,
    pub private_ip: Ipv4Addr,
    pub public_ip: Option<Ipv4Addr>,
    pub healthy: bool,
    pub started_at: i64,
}

/// Events reported to the supervisor from the runtime.
#[derive(Debug, Clone, Copy)]
pub enum ReplicaEvent {
    Exited { index: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    RollingBack,
}

/// State shared between the service handle and its supervisor task.
struct ServiceShared {
    name: String,
    namespace: Option<Arc<DiscoveryNamespace>>,
    prober: Arc<dyn HealthProber>,
    current_unit: RwLock<Arc<DeploymentUnit>>,
    desired_count: RwLock<u32>,
    assign_public_ip: bool,
    replicas: RwLock<Vec<Replica>>,
    mode: RwLock<Mode>,
    state_tx: watch::Sender<ServiceState>,
    endpoints_tx: watch::Sender<Vec<Ipv4Addr>>,
    health_path: RwLock<String>,
    next_replica_index: AtomicU64,
    ever_steady: AtomicBool,
    failed: AtomicBool,
    network: Arc<crate::network::Network>,
    metrics: TopologyMetrics,
}

impl ServiceShared {
    async fn start_replica(&self, unit: &DeploymentUnit) -> Replica {
        let private_ip = self.network.allocate_private_ip();
        let public_ip = self
            .assign_public_ip
            .then(|| self.network.allocate_public_ip());
        let replica = Replica {
            index: self.next_replica_index.fetch_add(1, Ordering::Relaxed),
            revision: unit.revision(),
            private_ip,
            public_ip,
            healthy: false,
            started_at: chrono::Utc::now().timestamp(),
        };

        if let Some(namespace) = &self.namespace {
            if let Err(e) = namespace
                .register_instance(&self.name, IpAddr::from(private_ip))
                .await
            {
                warn!(service = %self.name, error = %e, "Discovery registration failed");
            }
        }

        debug!(
            service = %self.name,
            replica = replica.index,
            revision = replica.revision,
            ip = %private_ip,
            "Replica started"
        );
        replica
    }

    async fn retire_replica(&self, replica: &Replica) {
        if let Some(namespace) = &self.namespace {
            let _ = namespace
                .deregister_instance(&self.name, IpAddr::from(replica.private_ip))
                .await;
        }
        debug!(
            service = %self.name,
            replica = replica.index,
            "Replica retired"
        );
    }

    /// Drop a replica the runtime reported as exited; the next
    /// reconcile pass starts a replacement.
    async fn mark_exited(&self, index: u64) {
        let removed = {
            let mut replicas = self.replicas.write().await;
            let before = replicas.len();
            replicas.retain(|r| r.index != index);
            before != replicas.len()
        };
        if removed {
            warn!(service = %self.name, replica = index, "Replica exited");
            self.metrics.inc_replica_restarts();
        }
    }

    /// Converge the replica set: drop stale revisions, honor the
    /// desired count, and publish the endpoint list.
    async fn reconcile(&self) {
        let desired = *self.desired_count.read().await as usize;
        let current = self.current_unit.read().await.clone();

        let mut replicas = self.replicas.write().await;

        let stale: Vec<Replica> = replicas
            .iter()
            .filter(|r| r.revision != current.revision())
            .cloned()
            .collect();
        if !stale.is_empty() {
            replicas.retain(|r| r.revision == current.revision());
            for replica in &stale {
                self.retire_replica(replica).await;
            }
        }

        while replicas.len() > desired {
            if let Some(replica) = replicas.pop() {
                self.retire_replica(&replica).await;
            }
        }

        while replicas.len() < desired {
            let replica = self.start_replica(&current).await;
            replicas.push(replica);
        }

        let endpoints: Vec<Ipv4Addr> = replicas.iter().map(|r| r.private_ip).collect();
        drop(replicas);
        self.endpoints_tx.send_replace(endpoints);
    }

    /// Probe every replica on the service's health check path.
    async fn probe_replicas(&self) {
        let unit = self.current_unit.read().await.clone();
        let port = unit.primary_port().container_port;
        let path = self.health_path.read().await.clone();

        let mut replicas = self.replicas.write().await;
        for replica in replicas.iter_mut() {
            let target = SocketAddr::from((replica.private_ip, port));
            replica.healthy = self.prober.probe(target, &path).await;
        }
    }

    async fn converged_to(&self, revision: u32) -> bool {
        let desired = *self.desired_count.read().await as usize;
        let replicas = self.replicas.read().await;
        replicas.len() == desired
            && replicas
                .iter()
                .all(|r| r.revision == revision && r.healthy)
    }

    /// Derive and publish the service state from the replica set.
    async fn publish_state(&self) {
        let previous = *self.state_tx.borrow();
        if self.failed.load(Ordering::Relaxed) {
            // terminal until operator intervention
            self.metrics
                .set_service_state(&self.name, ServiceState::Failed.as_str());
            self.state_tx.send_replace(ServiceState::Failed);
            return;
        }

        let current_revision = self.current_unit.read().await.revision();
        let converged = self.converged_to(current_revision).await;
        let mode = *self.mode.read().await;

        let next = if converged {
            self.ever_steady.store(true, Ordering::Relaxed);
            ServiceState::Steady
        } else if mode == Mode::RollingBack {
            ServiceState::RollingBack
        } else if self.ever_steady.load(Ordering::Relaxed) {
            ServiceState::Degraded
        } else {
            ServiceState::Pending
        };

        if next != previous {
            info!(
                service = %self.name,
                from = %previous,
                to = %next,
                "Service state changed"
            );
        }
        self.metrics.set_service_state(&self.name, next.as_str());
        self.state_tx.send_replace(next);
    }

    /// Retire everything on shutdown.
    async fn drain(&self) {
        let mut replicas = self.replicas.write().await;
        for replica in replicas.drain(..) {
            self.retire_replica(&replica).await;
        }
        self.endpoints_tx.send_replace(Vec::new());
    }
}

/// Supervisor control loop: one per service, running until shutdown.
async fn run_supervisor(
    shared: Arc<ServiceShared>,
    mut events: mpsc::Receiver<ReplicaEvent>,
    mut shutdown: broadcast::Receiver<()>,
    tick_every: Duration,
) {
    info!(
        service = %shared.name,
        interval_ms = tick_every.as_millis() as u64,
        "Starting service supervisor"
    );

    let mut ticker = interval(tick_every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.reconcile().await;
                shared.probe_replicas().await;
                shared.publish_state().await;
            }
            Some(event) = events.recv() => {
                match event {
                    ReplicaEvent::Exited { index } => shared.mark_exited(index).await,
                }
                shared.reconcile().await;
                shared.publish_state().await;
            }
            _ = shutdown.recv() => {
                info!(service = %shared.name, "Shutting down service supervisor");
                shared.drain().await;
                break;
            }
        }
    }
}

/// A supervised, horizontally scaled instantiation of a deployment
/// unit.
pub struct Service {
    shared: Arc<ServiceShared>,
    cluster: Arc<Cluster>,
    firewall: Firewall,
    settings: ServiceSettings,
    state_rx: watch::Receiver<ServiceState>,
    event_tx: mpsc::Sender<ReplicaEvent>,
    shutdown_tx: broadcast::Sender<()>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    deploy_lock: Mutex<()>,
}

impl Service {
    /// Launch a service and its supervisor task.
    ///
    /// The cluster's discovery namespace, when attached, receives one
    /// instance record per replica for the service's name.
    pub async fn launch(
        name: impl Into<String>,
        cluster: Arc<Cluster>,
        unit: Arc<DeploymentUnit>,
        settings: ServiceSettings,
        firewall: Firewall,
        prober: Arc<dyn HealthProber>,
    ) -> Arc<Self> {
        let name = name.into();
        let namespace = cluster.namespace().await;
        let (state_tx, state_rx) = watch::channel(ServiceState::Pending);
        let (endpoints_tx, _) = watch::channel(Vec::new());
        let (event_tx, event_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let shared = Arc::new(ServiceShared {
            name: name.clone(),
            namespace,
            prober,
            current_unit: RwLock::new(unit),
            desired_count: RwLock::new(settings.desired_count),
            assign_public_ip: settings.assign_public_ip,
            replicas: RwLock::new(Vec::new()),
            mode: RwLock::new(Mode::Run),
            state_tx,
            endpoints_tx,
            health_path: RwLock::new(DEFAULT_HEALTH_CHECK_PATH.to_string()),
            next_replica_index: AtomicU64::new(0),
            ever_steady: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            network: cluster.network().clone(),
            metrics: TopologyMetrics::new(),
        });

        let handle = tokio::spawn(run_supervisor(
            shared.clone(),
            event_rx,
            shutdown_rx,
            settings.supervision_interval,
        ));

        Arc::new(Self {
            shared,
            cluster,
            firewall,
            settings,
            state_rx,
            event_tx,
            shutdown_tx,
            supervisor: Mutex::new(Some(handle)),
            deploy_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    pub async fn replicas(&self) -> Vec<Replica> {
        self.shared.replicas.read().await.clone()
    }

    pub async fn current_unit(&self) -> Arc<DeploymentUnit> {
        self.shared.current_unit.read().await.clone()
    }

    pub async fn desired_count(&self) -> u32 {
        *self.shared.desired_count.read().await
    }

    /// Change the desired replica count; the supervisor converges to it
    /// on its next pass.
    pub async fn set_desired_count(&self, desired: u32) {
        *self.shared.desired_count.write().await = desired;
    }

    /// Report a replica exit from the runtime. The supervisor replaces
    /// it without operator intervention.
    pub async fn notify_replica_exit(&self, index: u64) {
        let _ = self.event_tx.send(ReplicaEvent::Exited { index }).await;
    }

    pub(crate) fn subscribe_endpoints(&self) -> watch::Receiver<Vec<Ipv4Addr>> {
        self.shared.endpoints_tx.subscribe()
    }

    pub(crate) async fn set_health_path(&self, path: &str) {
        *self.shared.health_path.write().await = path.to_string();
    }

    /// Block until the service reaches the given state, bounded by
    /// `window`.
    pub async fn await_state(&self, target: ServiceState, window: Duration) -> Result<()> {
        let mut rx = self.state_rx.clone();
        let wait = async {
            loop {
                if *rx.borrow_and_update() == target {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        timeout(window, wait)
            .await
            .map_err(|_| ProvisionError::DeploymentTimeout {
                service: self.shared.name.clone(),
                window_secs: window.as_secs(),
            })
    }

    async fn wait_converged(&self, revision: u32, window: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        let wait = async {
            loop {
                if self.shared.converged_to(revision).await
                    && *rx.borrow_and_update() == ServiceState::Steady
                {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        timeout(window, wait).await.is_ok()
    }

    /// Deploy a new revision of the service's deployment unit.
    ///
    /// The supervisor replaces every replica with the new revision. If
    /// steady state is not reached within `window`, the previous
    /// revision is restored when rollback-on-failure is set; otherwise
    /// the timeout is surfaced and the service is left degraded.
    pub async fn deploy(
        &self,
        new_unit: Arc<DeploymentUnit>,
        window: Duration,
    ) -> Result<DeployOutcome> {
        let _guard = self.deploy_lock.lock().await;

        let previous = self.shared.current_unit.read().await.clone();
        if new_unit.family() != previous.family() {
            return Err(ProvisionError::config(format!(
                "deployment unit family '{}' does not match service family '{}'",
                new_unit.family(),
                previous.family()
            )));
        }
        if new_unit.revision() == previous.revision() {
            return Err(ProvisionError::config(format!(
                "revision {} of '{}' is already deployed",
                new_unit.revision(),
                new_unit.family()
            )));
        }

        info!(
            service = %self.shared.name,
            from = %previous.qualified_name(),
            to = %new_unit.qualified_name(),
            "Deployment started"
        );
        *self.shared.current_unit.write().await = new_unit.clone();

        if self.wait_converged(new_unit.revision(), window).await {
            info!(
                service = %self.shared.name,
                revision = new_unit.revision(),
                "Deployment reached steady state"
            );
            return Ok(DeployOutcome::Deployed);
        }

        warn!(
            service = %self.shared.name,
            revision = new_unit.revision(),
            window_secs = window.as_secs(),
            "Deployment missed its startup window"
        );

        if !self.settings.rollback_on_failure {
            return Err(ProvisionError::DeploymentTimeout {
                service: self.shared.name.clone(),
                window_secs: window.as_secs(),
            });
        }

        // restore the previous revision under rollback mode so the
        // supervisor reports RollingBack instead of Degraded
        self.shared.metrics.inc_rollbacks();
        *self.shared.mode.write().await = Mode::RollingBack;
        self.shared.state_tx.send_replace(ServiceState::RollingBack);
        *self.shared.current_unit.write().await = previous.clone();

        let restored = self.wait_converged(previous.revision(), window).await;
        *self.shared.mode.write().await = Mode::Run;

        if restored {
            info!(
                service = %self.shared.name,
                revision = previous.revision(),
                "Rollback restored previous revision"
            );
            Ok(DeployOutcome::RolledBack)
        } else {
            self.shared.failed.store(true, Ordering::Relaxed);
            self.shared.state_tx.send_replace(ServiceState::Failed);
            self.shared
                .metrics
                .set_service_state(&self.shared.name, ServiceState::Failed.as_str());
            warn!(
                service = %self.shared.name,
                revision = previous.revision(),
                "Rollback did not converge, operator action required"
            );
            Err(ProvisionError::DeploymentTimeout {
                service: self.shared.name.clone(),
                window_secs: window.as_secs(),
            })
        }
    }

    /// Stop the supervisor and retire all replicas.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.supervisor.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::DeploymentUnitBuilder;
    use crate::models::Protocol;
    use crate::network::Network;
    use crate::providers::{async_trait, MemoryDiscovery, StaticProber};
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    /// Prober that reports healthy only for targets on an allowed port
    /// while the switch is on.
    struct PortGatedProber {
        allowed_port: u16,
        enabled: Arc<StdAtomicBool>,
    }

    #[async_trait]
    impl HealthProber for PortGatedProber {
        async fn probe(&self, target: SocketAddr, _path: &str) -> bool {
            self.enabled.load(Ordering::Relaxed) && target.port() == self.allowed_port
        }
    }

    fn test_cluster() -> Arc<Cluster> {
        let network = Arc::new(
            Network::create("vpc", "10.0.0.0/16".parse().unwrap(), 2, 1).unwrap(),
        );
        Arc::new(Cluster::new(network, "services"))
    }

    fn unit(revision: u32, port: u16) -> Arc<DeploymentUnit> {
        Arc::new(
            DeploymentUnitBuilder::new("webapp")
                .revision(revision)
                .image("registry.local/webapp:1.0")
                .port(port, Protocol::Tcp)
                .build()
                .unwrap(),
        )
    }

    fn fast_settings(desired: u32, rollback: bool) -> ServiceSettings {
        ServiceSettings {
            desired_count: desired,
            rollback_on_failure: rollback,
            assign_public_ip: false,
            startup_window: Duration::from_millis(300),
            supervision_interval: Duration::from_millis(10),
        }
    }

    async fn launch(
        desired: u32,
        rollback: bool,
        prober: Arc<dyn HealthProber>,
    ) -> Arc<Service> {
        Service::launch(
            "web",
            test_cluster(),
            unit(1, 8080),
            fast_settings(desired, rollback),
            Firewall::new("web-sg"),
            prober,
        )
        .await
    }

    #[tokio::test]
    async fn test_service_reaches_steady_state() {
        let service = launch(2, true, Arc::new(StaticProber::healthy())).await;

        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(service.replicas().await.len(), 2);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_service_never_probed_healthy_stays_pending() {
        let service = launch(1, true, Arc::new(StaticProber::unhealthy())).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.state(), ServiceState::Pending);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_exited_replica_is_restarted() {
        let service = launch(2, true, Arc::new(StaticProber::healthy())).await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();

        let victim = service.replicas().await[0].index;
        service.notify_replica_exit(victim).await;

        // the supervisor replaces the replica and re-converges
        tokio::time::sleep(Duration::from_millis(100)).await;
        let replicas = service.replicas().await;
        assert_eq!(replicas.len(), 2);
        assert!(replicas.iter().all(|r| r.index != victim));
        assert_eq!(service.state(), ServiceState::Steady);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_desired_count_scaling() {
        let service = launch(1, true, Arc::new(StaticProber::healthy())).await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();

        service.set_desired_count(3).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.replicas().await.len(), 3);

        service.set_desired_count(0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.replicas().await.is_empty());
        // desired == running == 0 is vacuously steady
        assert_eq!(service.state(), ServiceState::Steady);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_public_ip_assignment() {
        let settings = ServiceSettings {
            assign_public_ip: true,
            ..fast_settings(2, true)
        };
        let service = Service::launch(
            "web",
            test_cluster(),
            unit(1, 8080),
            settings,
            Firewall::new("web-sg"),
            Arc::new(StaticProber::healthy()),
        )
        .await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();

        for replica in service.replicas().await {
            assert!(replica.public_ip.is_some());
        }
        service.stop().await;
    }

    #[tokio::test]
    async fn test_successful_deployment_replaces_revision() {
        let enabled = Arc::new(StdAtomicBool::new(true));
        // both revisions listen on the allowed port
        let prober = Arc::new(PortGatedProber {
            allowed_port: 8080,
            enabled: enabled.clone(),
        });
        let service = launch(2, true, prober).await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();

        let outcome = service
            .deploy(unit(2, 8080), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(outcome, DeployOutcome::Deployed);
        assert_eq!(service.current_unit().await.revision(), 2);
        assert!(service
            .replicas()
            .await
            .iter()
            .all(|r| r.revision == 2));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_failed_deployment_rolls_back_to_steady() {
        // revision 2 moves to port 9090, which the prober never accepts
        let prober = Arc::new(PortGatedProber {
            allowed_port: 8080,
            enabled: Arc::new(StdAtomicBool::new(true)),
        });
        let service = launch(2, true, prober).await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();

        let mut states = service.watch_state();
        let saw_rolling_back = tokio::spawn(async move {
            loop {
                if *states.borrow_and_update() == ServiceState::RollingBack {
                    return true;
                }
                if states.changed().await.is_err() {
                    return false;
                }
            }
        });

        let outcome = service
            .deploy(unit(2, 9090), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(outcome, DeployOutcome::RolledBack);
        assert!(saw_rolling_back.await.unwrap());

        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(service.current_unit().await.revision(), 1);
        assert_ne!(service.state(), ServiceState::Failed);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_failed_deployment_without_rollback_leaves_degraded() {
        let prober = Arc::new(PortGatedProber {
            allowed_port: 8080,
            enabled: Arc::new(StdAtomicBool::new(true)),
        });
        let service = launch(1, false, prober).await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();

        let err = service
            .deploy(unit(2, 9090), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::DeploymentTimeout { .. }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.state(), ServiceState::Degraded);
        // the failed revision stays in place for the operator
        assert_eq!(service.current_unit().await.revision(), 2);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_failed_rollback_marks_service_failed() {
        let enabled = Arc::new(StdAtomicBool::new(true));
        let prober = Arc::new(PortGatedProber {
            allowed_port: 8080,
            enabled: enabled.clone(),
        });
        let service = launch(1, true, prober).await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();

        // nothing probes healthy anymore: the new revision misses its
        // window and the rollback cannot converge either
        enabled.store(false, Ordering::Relaxed);

        let err = service
            .deploy(unit(2, 9090), Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::DeploymentTimeout { .. }));
        assert_eq!(service.state(), ServiceState::Failed);

        // Failed is terminal: further ticks do not overwrite it
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.state(), ServiceState::Failed);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_deploy_rejects_mismatched_family() {
        let service = launch(1, true, Arc::new(StaticProber::healthy())).await;
        let other = Arc::new(
            DeploymentUnitBuilder::new("worker")
                .image("registry.local/worker:1.0")
                .port(9000, Protocol::Tcp)
                .build()
                .unwrap(),
        );
        let err = service
            .deploy(other, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_config());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_replicas_register_in_discovery_namespace() {
        let network = Arc::new(
            Network::create("vpc", "10.0.0.0/16".parse().unwrap(), 2, 1).unwrap(),
        );
        let cluster = Arc::new(Cluster::new(network, "services"));
        let backend = Arc::new(MemoryDiscovery::new());
        let namespace = cluster
            .attach_discovery_namespace("internal.example", backend)
            .await
            .unwrap();

        let service = Service::launch(
            "worker",
            cluster,
            unit(1, 8080),
            fast_settings(2, true),
            Firewall::new("worker-sg"),
            Arc::new(StaticProber::healthy()),
        )
        .await;
        service
            .await_state(ServiceState::Steady, Duration::from_secs(2))
            .await
            .unwrap();

        let resolved = namespace.resolve("worker").await.unwrap();
        assert_eq!(resolved.len(), 2);

        // teardown deregisters the instances
        service.stop().await;
        assert!(namespace.resolve("worker").await.is_err());
    }
}

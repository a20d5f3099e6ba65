//! Orchestration cluster and its private discovery namespace
//!
//! A cluster groups compute capacity inside a network and optionally
//! carries one discovery namespace: a private DNS zone through which
//! services address each other by name without crossing the traffic
//! distributor.

use crate::error::{ProvisionError, Result};
use crate::network::Network;
use crate::providers::DiscoveryBackend;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// A private DNS zone scoped to a cluster's network.
pub struct DiscoveryNamespace {
    domain: String,
    backend: Arc<dyn DiscoveryBackend>,
}

impl DiscoveryNamespace {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub(crate) async fn register_instance(&self, service: &str, addr: IpAddr) -> Result<()> {
        self.backend
            .register_instance(&self.domain, service, addr)
            .await
    }

    pub(crate) async fn deregister_instance(&self, service: &str, addr: IpAddr) -> Result<()> {
        self.backend
            .deregister_instance(&self.domain, service, addr)
            .await
    }

    /// Resolve a service name within this namespace to live replica
    /// addresses.
    pub async fn resolve(&self, service: &str) -> Result<Vec<IpAddr>> {
        self.backend
            .resolve(&format!("{}.{}", service, self.domain))
            .await
    }
}

impl fmt::Debug for DiscoveryNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryNamespace")
            .field("domain", &self.domain)
            .finish()
    }
}

/// A logical grouping of compute capacity bound to a network.
pub struct Cluster {
    name: String,
    network: Arc<Network>,
    container_insights: bool,
    namespace: RwLock<Option<Arc<DiscoveryNamespace>>>,
    created_at: DateTime<Utc>,
}

impl Cluster {
    pub fn new(network: Arc<Network>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            network,
            container_insights: false,
            namespace: RwLock::new(None),
            created_at: Utc::now(),
        }
    }

    /// Enable per-service metric collection for workloads in this
    /// cluster.
    pub fn with_container_insights(mut self, enabled: bool) -> Self {
        self.container_insights = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn container_insights(&self) -> bool {
        self.container_insights
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Bind a private DNS zone to this cluster.
    ///
    /// A cluster carries at most one namespace; attaching a second
    /// domain is a conflict. The domain itself is registered with the
    /// external discovery backend.
    pub async fn attach_discovery_namespace(
        &self,
        domain: &str,
        backend: Arc<dyn DiscoveryBackend>,
    ) -> Result<Arc<DiscoveryNamespace>> {
        if domain.is_empty() {
            return Err(ProvisionError::config(
                "discovery namespace domain must not be empty",
            ));
        }

        let mut slot = self.namespace.write().await;
        if let Some(existing) = slot.as_ref() {
            return Err(ProvisionError::conflict(format!(
                "cluster '{}' already has discovery namespace '{}'",
                self.name,
                existing.domain()
            )));
        }

        backend.register_namespace(domain).await?;
        let namespace = Arc::new(DiscoveryNamespace {
            domain: domain.to_string(),
            backend,
        });
        *slot = Some(namespace.clone());

        info!(
            cluster = %self.name,
            domain = %domain,
            "Discovery namespace attached"
        );
        Ok(namespace)
    }

    pub async fn namespace(&self) -> Option<Arc<DiscoveryNamespace>> {
        self.namespace.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryDiscovery;
    use std::net::Ipv4Addr;

    fn cluster() -> Cluster {
        let network = Arc::new(
            Network::create("vpc", "10.0.0.0/16".parse().unwrap(), 2, 1).unwrap(),
        );
        Cluster::new(network, "services").with_container_insights(true)
    }

    #[tokio::test]
    async fn test_attach_namespace_once() {
        let cluster = cluster();
        let backend = Arc::new(MemoryDiscovery::new());

        let namespace = cluster
            .attach_discovery_namespace("internal.example", backend.clone())
            .await
            .unwrap();
        assert_eq!(namespace.domain(), "internal.example");
        assert!(cluster.namespace().await.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_namespace_attachment_conflicts() {
        let cluster = cluster();
        let backend = Arc::new(MemoryDiscovery::new());

        cluster
            .attach_discovery_namespace("internal.example", backend.clone())
            .await
            .unwrap();
        let err = cluster
            .attach_discovery_namespace("other.example", backend)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_empty_domain_rejected() {
        let cluster = cluster();
        let backend = Arc::new(MemoryDiscovery::new());
        let err = cluster
            .attach_discovery_namespace("", backend)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_namespace_resolution_round_trip() {
        let cluster = cluster();
        let backend = Arc::new(MemoryDiscovery::new());
        let namespace = cluster
            .attach_discovery_namespace("internal.example", backend)
            .await
            .unwrap();

        let addr: IpAddr = Ipv4Addr::new(10, 0, 130, 10).into();
        namespace.register_instance("web", addr).await.unwrap();

        let resolved = namespace.resolve("web").await.unwrap();
        assert_eq!(resolved, vec![addr]);
    }
}

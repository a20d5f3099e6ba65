//! External collaborator interfaces
//!
//! The core consumes four remote services by reference only: an image
//! registry, a log store, a DNS/discovery backend, and a health-check
//! prober. Each is a trait seam; in-process implementations back local
//! provisioning and tests. Failures surface as `Dependency` errors and
//! are never retried here.

use crate::error::{ProvisionError, Result};
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

pub use async_trait::async_trait;

/// A resolved, pullable container image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub reference: String,
    pub digest: String,
}

/// A log stream binding created in the external log store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBinding {
    pub stream_prefix: String,
    pub retention_days: u32,
}

/// Resolves image references to pullable artifacts.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn resolve(&self, image_ref: &str) -> Result<ImageArtifact>;
}

/// Accepts a stream prefix and retention policy. The core only
/// configures the binding, it never writes logs.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn create_stream(&self, prefix: &str, retention_days: u32) -> Result<LogBinding>;
}

/// Private name resolution scoped to a namespace domain.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    async fn register_namespace(&self, domain: &str) -> Result<()>;
    async fn register_instance(&self, domain: &str, service: &str, addr: IpAddr) -> Result<()>;
    async fn deregister_instance(&self, domain: &str, service: &str, addr: IpAddr) -> Result<()>;
    /// Resolve `<service>.<domain>` to live replica addresses.
    async fn resolve(&self, fqdn: &str) -> Result<Vec<IpAddr>>;
}

/// Polls a path on a backend and reports healthy/unhealthy. The core
/// only supplies the target and path.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, target: SocketAddr, path: &str) -> bool;
}

/// The full set of collaborators a topology build needs.
#[derive(Clone)]
pub struct Providers {
    pub image_registry: Arc<dyn ImageRegistry>,
    pub log_store: Arc<dyn LogStore>,
    pub discovery: Arc<dyn DiscoveryBackend>,
    pub prober: Arc<dyn HealthProber>,
}

impl Providers {
    /// In-process providers suitable for local provisioning and tests:
    /// a static image catalog, in-memory log and discovery stores, and
    /// a prober that reports every backend healthy.
    pub fn in_process<I>(images: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            image_registry: Arc::new(StaticImageRegistry::new(images)),
            log_store: Arc::new(MemoryLogStore::new()),
            discovery: Arc::new(MemoryDiscovery::new()),
            prober: Arc::new(StaticProber::healthy()),
        }
    }
}

/// Image registry backed by a fixed catalog of known references.
pub struct StaticImageRegistry {
    catalog: DashMap<String, String>,
}

impl StaticImageRegistry {
    pub fn new<I>(images: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let catalog = DashMap::new();
        for image in images {
            let reference = image.into();
            let digest = pseudo_digest(&reference);
            catalog.insert(reference, digest);
        }
        Self { catalog }
    }
}

#[async_trait]
impl ImageRegistry for StaticImageRegistry {
    async fn resolve(&self, image_ref: &str) -> Result<ImageArtifact> {
        match self.catalog.get(image_ref) {
            Some(digest) => Ok(ImageArtifact {
                reference: image_ref.to_string(),
                digest: digest.clone(),
            }),
            None => Err(ProvisionError::dependency(
                "image-registry",
                format!("image reference '{}' not found", image_ref),
            )),
        }
    }
}

fn pseudo_digest(reference: &str) -> String {
    let mut hasher = DefaultHasher::new();
    reference.hash(&mut hasher);
    format!("sha256:{:016x}", hasher.finish())
}

/// In-memory log store; create is get-or-create, as log groups are.
#[derive(Default)]
pub struct MemoryLogStore {
    streams: DashMap<String, u32>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn create_stream(&self, prefix: &str, retention_days: u32) -> Result<LogBinding> {
        self.streams.insert(prefix.to_string(), retention_days);
        Ok(LogBinding {
            stream_prefix: prefix.to_string(),
            retention_days,
        })
    }
}

/// In-memory discovery backend keyed by fully qualified instance name.
#[derive(Default)]
pub struct MemoryDiscovery {
    namespaces: DashMap<String, ()>,
    records: DashMap<String, Vec<IpAddr>>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscoveryBackend for MemoryDiscovery {
    async fn register_namespace(&self, domain: &str) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.namespaces.entry(domain.to_string()) {
            Entry::Occupied(_) => Err(ProvisionError::conflict(format!(
                "namespace domain '{}' is already registered",
                domain
            ))),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(())
            }
        }
    }

    async fn register_instance(&self, domain: &str, service: &str, addr: IpAddr) -> Result<()> {
        let fqdn = format!("{}.{}", service, domain);
        let mut entry = self.records.entry(fqdn).or_default();
        if !entry.contains(&addr) {
            entry.push(addr);
        }
        Ok(())
    }

    async fn deregister_instance(&self, domain: &str, service: &str, addr: IpAddr) -> Result<()> {
        let fqdn = format!("{}.{}", service, domain);
        if let Some(mut entry) = self.records.get_mut(&fqdn) {
            entry.retain(|a| *a != addr);
        }
        Ok(())
    }

    async fn resolve(&self, fqdn: &str) -> Result<Vec<IpAddr>> {
        match self.records.get(fqdn) {
            Some(addrs) if !addrs.is_empty() => Ok(addrs.clone()),
            _ => Err(ProvisionError::dependency(
                "discovery",
                format!("no records for '{}'", fqdn),
            )),
        }
    }
}

/// Prober with a fixed answer, for local provisioning and tests.
pub struct StaticProber {
    healthy: bool,
}

impl StaticProber {
    pub fn healthy() -> Self {
        Self { healthy: true }
    }

    pub fn unhealthy() -> Self {
        Self { healthy: false }
    }
}

#[async_trait]
impl HealthProber for StaticProber {
    async fn probe(&self, _target: SocketAddr, _path: &str) -> bool {
        self.healthy
    }
}

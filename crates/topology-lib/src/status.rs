//! Resource status tracking for provisioning gates
//!
//! Every resource created during a topology build is tracked here.
//! Dependent creation steps block on `await_ready` until the resources
//! they reference report `Ready`, which establishes the partial order
//! of the dependency graph without a generic executor.

use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Provisioning status of a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Creation requested, not yet usable by dependents.
    Creating,
    /// Fully provisioned; dependents may proceed.
    Ready,
    /// Provisioned but not converged (e.g. unhealthy replicas).
    Degraded,
    /// Provisioning or supervision failed; dependents must not proceed.
    Failed,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Creating => "creating",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Degraded => "degraded",
            ResourceStatus::Failed => "failed",
        }
    }
}

/// Status record for one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition: i64,
}

impl ResourceRecord {
    fn new(status: ResourceStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_transition: chrono::Utc::now().timestamp(),
        }
    }
}

/// Aggregated view served by the daemon's health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyHealth {
    pub status: ResourceStatus,
    pub resources: HashMap<String, ResourceRecord>,
}

impl TopologyHealth {
    /// Compute the overall status from individual records.
    pub fn compute_status(resources: &HashMap<String, ResourceRecord>) -> ResourceStatus {
        let mut converging = false;
        for record in resources.values() {
            match record.status {
                ResourceStatus::Failed => return ResourceStatus::Failed,
                ResourceStatus::Creating | ResourceStatus::Degraded => converging = true,
                ResourceStatus::Ready => {}
            }
        }
        if converging {
            ResourceStatus::Degraded
        } else {
            ResourceStatus::Ready
        }
    }
}

/// Registry of resource statuses with awaitable readiness.
#[derive(Clone)]
pub struct StatusRegistry {
    resources: Arc<RwLock<HashMap<String, watch::Sender<ResourceRecord>>>>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self {
            resources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Track a resource, initially `Creating`.
    pub async fn register(&self, name: &str) {
        let mut resources = self.resources.write().await;
        resources.entry(name.to_string()).or_insert_with(|| {
            let (tx, _rx) = watch::channel(ResourceRecord::new(ResourceStatus::Creating, None));
            tx
        });
    }

    async fn set(&self, name: &str, status: ResourceStatus, message: Option<String>) {
        let resources = self.resources.read().await;
        if let Some(tx) = resources.get(name) {
            tx.send_replace(ResourceRecord::new(status, message));
        } else {
            tracing::warn!(resource = %name, "Status update for untracked resource");
        }
    }

    pub async fn set_ready(&self, name: &str) {
        self.set(name, ResourceStatus::Ready, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ResourceStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_failed(&self, name: &str, message: impl Into<String>) {
        self.set(name, ResourceStatus::Failed, Some(message.into()))
            .await;
    }

    pub async fn get(&self, name: &str) -> Option<ResourceRecord> {
        let resources = self.resources.read().await;
        resources.get(name).map(|tx| tx.borrow().clone())
    }

    pub async fn snapshot(&self) -> HashMap<String, ResourceRecord> {
        let resources = self.resources.read().await;
        resources
            .iter()
            .map(|(name, tx)| (name.clone(), tx.borrow().clone()))
            .collect()
    }

    /// Aggregated health view.
    pub async fn health(&self) -> TopologyHealth {
        let resources = self.snapshot().await;
        let status = TopologyHealth::compute_status(&resources);
        TopologyHealth { status, resources }
    }

    /// Block until the named resource reports `Ready`.
    ///
    /// Returns a dependency error if the resource is unknown, fails, or
    /// its status channel closes.
    pub async fn await_ready(&self, name: &str) -> Result<()> {
        let mut rx = {
            let resources = self.resources.read().await;
            resources
                .get(name)
                .map(|tx| tx.subscribe())
                .ok_or_else(|| ProvisionError::dependency(name, "resource is not tracked"))?
        };

        loop {
            let record = rx.borrow_and_update().clone();
            match record.status {
                ResourceStatus::Ready => return Ok(()),
                ResourceStatus::Failed => {
                    return Err(ProvisionError::dependency(
                        name,
                        record
                            .message
                            .unwrap_or_else(|| "resource failed".to_string()),
                    ))
                }
                ResourceStatus::Creating | ResourceStatus::Degraded => {}
            }
            if rx.changed().await.is_err() {
                return Err(ProvisionError::dependency(name, "status channel closed"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_registered_resource_starts_creating() {
        let registry = StatusRegistry::new();
        registry.register("network").await;

        let record = registry.get("network").await.unwrap();
        assert_eq!(record.status, ResourceStatus::Creating);
    }

    #[tokio::test]
    async fn test_await_ready_unblocks_on_transition() {
        let registry = StatusRegistry::new();
        registry.register("network").await;

        let waiter = registry.clone();
        let handle = tokio::spawn(async move { waiter.await_ready("network").await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.set_ready("network").await;

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("await_ready should unblock")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_await_ready_on_failed_resource_errors() {
        let registry = StatusRegistry::new();
        registry.register("cluster").await;
        registry.set_failed("cluster", "capacity exhausted").await;

        let err = registry.await_ready("cluster").await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Dependency { ref dependency, .. } if dependency == "cluster"
        ));
    }

    #[tokio::test]
    async fn test_await_ready_unknown_resource_errors() {
        let registry = StatusRegistry::new();
        assert!(registry.await_ready("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_overall_health_aggregation() {
        let registry = StatusRegistry::new();
        registry.register("network").await;
        registry.register("cluster").await;
        registry.set_ready("network").await;
        registry.set_ready("cluster").await;

        assert_eq!(registry.health().await.status, ResourceStatus::Ready);

        registry.set_degraded("cluster", "converging").await;
        assert_eq!(registry.health().await.status, ResourceStatus::Degraded);

        registry.set_failed("network", "gone").await;
        assert_eq!(registry.health().await.status, ResourceStatus::Failed);
    }
}

//! Error types for topology provisioning

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Failure kinds surfaced by provisioning operations.
///
/// `Config` and `Conflict` are always raised before any resource is
/// created. `Dependency` identifies the external collaborator that
/// failed; the library never retries it. `DeploymentTimeout` reports a
/// service revision that missed its startup window.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Malformed or contradictory input. Never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A duplicate identifier: routing priority, namespace domain, or
    /// resource name. The caller must pick a different one.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An external collaborator was unreachable or returned not-found.
    #[error("dependency '{dependency}' failed: {reason}")]
    Dependency { dependency: String, reason: String },

    /// A new service revision failed to reach steady state within its
    /// startup window.
    #[error("service '{service}' did not reach steady state within {window_secs}s")]
    DeploymentTimeout { service: String, window_secs: u64 },
}

impl ProvisionError {
    pub fn config(message: impl Into<String>) -> Self {
        ProvisionError::Config(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ProvisionError::Conflict(message.into())
    }

    pub fn dependency(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        ProvisionError::Dependency {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by bad input rather than runtime state.
    pub fn is_config(&self) -> bool {
        matches!(self, ProvisionError::Config(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ProvisionError::Conflict(_))
    }
}

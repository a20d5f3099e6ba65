//! Declarative topology and routing model
//!
//! This crate provides the core functionality for:
//! - Network boundary allocation with public/private subnet tiers
//! - Traffic distribution with path-based routing rules
//! - Orchestration clusters and private service discovery
//! - Immutable deployment units and supervised services
//! - Routing registration binding services to public traffic
//! - Topology construction with readiness-gated dependencies

pub mod cluster;
pub mod config;
pub mod deployment;
pub mod distributor;
pub mod error;
pub mod firewall;
pub mod models;
pub mod network;
pub mod observability;
pub mod providers;
pub mod registration;
pub mod service;
pub mod status;
pub mod topology;

pub use config::TopologyConfig;
pub use error::{ProvisionError, Result};
pub use observability::{ProvisionLogger, TopologyMetrics};
pub use providers::Providers;
pub use status::{ResourceRecord, ResourceStatus, StatusRegistry, TopologyHealth};
pub use topology::{build_topology, TopologyDescription, TopologyHandle};

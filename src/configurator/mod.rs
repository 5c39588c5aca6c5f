//! Replica Configurator Module
//!
//! Turns replica descriptors and volume configurations into running engine
//! resources and keeps them that way.
//!
//! A replica's state is never stored; it is inferred from its config file
//! and what the engine reports:
//!
//! ```text
//! Absent -> Configured (stale | current) -> Active (HAState) -> Absent
//! ```

mod locks;
mod reconcile;
mod replica_configurator;

use tokio::sync::watch;

use crate::error::Result;
use crate::replica::{HAState, ReplicaDescriptor, VolumeConfig};

pub use locks::ResourceLocks;
pub use reconcile::CheckSummary;
pub use replica_configurator::ReplicaConfigurator;

/// Mismatch between a replica's desired and observed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconsistency {
    /// No config file on disk
    ConfigMissing,
    /// Config file differs from the desired configuration
    ConfigStale,
    /// Config file present but the engine does not run the resource
    ResourceNotActive,
    /// Engine role differs from the role in the volume topology
    RoleMismatch,
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inconsistency::ConfigMissing => write!(f, "config missing"),
            Inconsistency::ConfigStale => write!(f, "config stale"),
            Inconsistency::ResourceNotActive => write!(f, "resource not active"),
            Inconsistency::RoleMismatch => write!(f, "role mismatch"),
        }
    }
}

/// Lifecycle and query operations on the replicas of this node
///
/// Operations on the same replica are serialized; operations on different
/// replicas run independently.
#[async_trait::async_trait]
pub trait Configurator: Send + Sync {
    /// Reconcile known replicas periodically until `stop` is set
    async fn run(&self, stop: watch::Receiver<bool>);

    /// Check whether the replica has a config file
    async fn has_config(&self, replica: &ReplicaDescriptor) -> bool;

    /// Check whether the config file is missing or differs from `config`
    async fn is_config_updated(&self, replica: &ReplicaDescriptor, config: &VolumeConfig) -> bool;

    /// Write the config and bring the resource up
    async fn initialize(&self, replica: &ReplicaDescriptor, config: &VolumeConfig) -> Result<()>;

    /// Rewrite the config if needed and make the engine adopt it
    async fn apply_config(&self, replica: &ReplicaDescriptor, config: &VolumeConfig) -> Result<()>;

    /// Tear the resource down and remove its config
    async fn delete_config(&self, replica: &ReplicaDescriptor) -> Result<()>;

    /// Verify and repair every given replica, logging what cannot be fixed
    async fn consistency_check(&self, replicas: &[ReplicaDescriptor]);

    /// Current HA state, `ResourceNotActive` if the resource is not running
    async fn get_replica_ha_state(&self, replica: &ReplicaDescriptor) -> Result<HAState>;
}

//! replicad - Node-local Replica Configurator for DRBD
//!
//! Keeps the block-level replicas hosted on one storage node in the state
//! the control plane asked for. Each replica is backed by one DRBD resource
//! whose configuration lives in its own file under the config directory.
//!
//! # Architecture
//!
//! The configurator renders resource files from replica descriptors and
//! volume configurations, drives the engine through `drbdadm`/`drbdsetup`,
//! and periodically repairs replicas that drifted from what was requested.
//!
//! # Features
//!
//! - Idempotent initialize, apply and delete per replica
//! - Atomic config file replacement
//! - HA state from the engine's JSON status
//! - Background consistency checks with bounded concurrency
//! - Per-resource serialization of all mutating operations

pub mod config;
pub mod configurator;
pub mod engine;
pub mod error;
pub mod replica;
pub mod resource;

pub use config::AgentConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::AgentConfig;
    pub use crate::configurator::{Configurator, ReplicaConfigurator};
    pub use crate::engine::{DrbdEngine, ReplicationEngine};
    pub use crate::error::{Error, Result};
    pub use crate::replica::{HAState, ReplicaDescriptor, VolumeConfig};
}

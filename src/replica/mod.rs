//! Replica Data Model
//!
//! Descriptors and volume configurations supplied by the control plane,
//! and the HA state snapshots reported back to it.

mod descriptor;
mod ha_state;

pub use descriptor::{ReplicaDescriptor, ReplicaPeer, VolumeConfig};
pub use ha_state::{ConnectionState, DataState, HAState, PeerState, ReplicaRole};

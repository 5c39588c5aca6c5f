//! Replica descriptors and desired volume configuration

use serde::{Deserialize, Serialize};

/// One replica of one logical volume on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    /// Unique resource name, stable for the replica's lifetime
    pub name: String,
    /// Volume this replica belongs to
    pub volume_name: String,
    /// Storage pool holding the backing device
    pub storage_pool_name: String,
    /// Node the replica is scheduled to
    pub node_name: String,
    /// Capacity the backing device must provide
    pub required_capacity_bytes: u64,
}

/// A replica of a volume as seen from the volume's topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaPeer {
    /// Engine node id of this replica within the resource
    pub id: u32,
    /// Host the replica runs on
    pub hostname: String,
    /// Replication IP of the host
    pub ip: String,
    /// Whether this replica should hold the primary role
    #[serde(default)]
    pub primary: bool,
}

/// Desired runtime configuration for the engine instance backing a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub volume_name: String,
    pub required_capacity_bytes: u64,
    /// Selects the device minor and replication port of the resource
    #[serde(default)]
    pub resource_id: u32,
    /// All replicas of the volume, including the local one
    #[serde(default)]
    pub replicas: Vec<ReplicaPeer>,
    /// Whether the volume has been brought up as primary before
    #[serde(default)]
    pub initialized: bool,
}

impl VolumeConfig {
    /// Minimal configuration for a volume without peer topology
    pub fn new(volume_name: impl Into<String>, required_capacity_bytes: u64) -> Self {
        Self {
            volume_name: volume_name.into(),
            required_capacity_bytes,
            resource_id: 0,
            replicas: Vec::new(),
            initialized: false,
        }
    }

    /// Find the topology entry for a host
    pub fn peer(&self, hostname: &str) -> Option<&ReplicaPeer> {
        self.replicas.iter().find(|p| p.hostname == hostname)
    }

    /// Check that this configuration may be applied to a replica
    pub fn validate_for(&self, replica: &ReplicaDescriptor) -> crate::Result<()> {
        let invalid = |reason: String| crate::Error::InvalidVolumeConfig {
            resource: replica.name.clone(),
            reason,
        };

        if self.volume_name != replica.volume_name {
            return Err(invalid(format!(
                "config is for volume {}, replica belongs to {}",
                self.volume_name, replica.volume_name
            )));
        }

        let mut ids = std::collections::HashSet::new();
        let mut hosts = std::collections::HashSet::new();
        for peer in &self.replicas {
            if !ids.insert(peer.id) {
                return Err(invalid(format!("duplicate node id {}", peer.id)));
            }
            if !hosts.insert(peer.hostname.as_str()) {
                return Err(invalid(format!("host {} listed twice", peer.hostname)));
            }
        }

        if self.replicas.iter().filter(|p| p.primary).count() > 1 {
            return Err(invalid("more than one primary replica".to_string()));
        }

        Ok(())
    }
}

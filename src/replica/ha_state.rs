//! HA state snapshots

use serde::{Deserialize, Serialize};

/// Role of a replica in its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    Primary,
    Secondary,
    Unknown,
}

impl std::fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaRole::Primary => write!(f, "PRIMARY"),
            ReplicaRole::Secondary => write!(f, "SECONDARY"),
            ReplicaRole::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Replication link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// All links established
    Connected,
    /// At least one link is down or still connecting
    Disconnected,
    /// No replication links configured or links were dropped for good
    StandAlone,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::StandAlone => write!(f, "STANDALONE"),
        }
    }
}

/// Health of the replicated data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataState {
    Consistent,
    Inconsistent,
    /// Replicas modified data independently (split brain)
    Diverged,
}

impl std::fmt::Display for DataState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataState::Consistent => write!(f, "CONSISTENT"),
            DataState::Inconsistent => write!(f, "INCONSISTENT"),
            DataState::Diverged => write!(f, "DIVERGED"),
        }
    }
}

/// State of one replication peer as seen from this node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerState {
    pub node_id: u32,
    pub name: String,
    pub role: ReplicaRole,
    pub connection: ConnectionState,
    /// Engine-reported disk state of the peer
    pub disk_state: String,
    /// Data still to be resynced to or from the peer
    pub out_of_sync_kib: u64,
}

/// Point-in-time replication health of a replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HAState {
    pub resource: String,
    pub role: ReplicaRole,
    pub connection: ConnectionState,
    pub data: DataState,
    /// Engine-reported disk state of the local replica
    pub disk_state: String,
    pub peers: Vec<PeerState>,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

impl HAState {
    pub fn is_primary(&self) -> bool {
        self.role == ReplicaRole::Primary
    }

    /// Check if the replica is fully replicated and in sync
    pub fn is_healthy(&self) -> bool {
        self.data == DataState::Consistent
            && (self.peers.is_empty() || self.connection == ConnectionState::Connected)
    }
}

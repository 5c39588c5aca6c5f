//! Engine status parsing
//!
//! Interprets the JSON document printed by `drbdsetup status --json`.

use serde::Deserialize;

use super::{EngineError, EngineResult};
use crate::replica::{ConnectionState, DataState, HAState, PeerState, ReplicaRole};

const UP_TO_DATE: &str = "UpToDate";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StatusResource {
    name: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    devices: Vec<StatusDevice>,
    #[serde(default)]
    connections: Vec<StatusConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StatusDevice {
    #[serde(default)]
    disk_state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StatusConnection {
    peer_node_id: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    connection_state: String,
    #[serde(default)]
    peer_role: String,
    #[serde(default, rename = "peer_devices")]
    peer_devices: Vec<StatusPeerDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StatusPeerDevice {
    #[serde(default)]
    peer_disk_state: String,
    #[serde(default)]
    out_of_sync: u64,
}

fn parse_role(role: &str) -> ReplicaRole {
    match role {
        "Primary" => ReplicaRole::Primary,
        "Secondary" => ReplicaRole::Secondary,
        _ => ReplicaRole::Unknown,
    }
}

fn parse_connection(state: &str) -> ConnectionState {
    match state {
        "Connected" => ConnectionState::Connected,
        "StandAlone" => ConnectionState::StandAlone,
        _ => ConnectionState::Disconnected,
    }
}

/// Build the HA state of a resource from `drbdsetup status --json` output
///
/// A peer link in StandAlone is reported as diverged data: the engine
/// drops a connection to StandAlone when it detects a split brain.
pub fn parse_status(resource: &str, json: &str) -> EngineResult<HAState> {
    let resources: Vec<StatusResource> =
        serde_json::from_str(json).map_err(|e| EngineError::Status {
            resource: resource.to_string(),
            reason: e.to_string(),
        })?;

    let status = resources
        .into_iter()
        .find(|r| r.name == resource)
        .ok_or_else(|| EngineError::NotFound(resource.to_string()))?;

    let disk_state = status
        .devices
        .first()
        .map(|d| d.disk_state.clone())
        .unwrap_or_else(|| "DUnknown".to_string());

    let peers: Vec<PeerState> = status
        .connections
        .iter()
        .map(|c| PeerState {
            node_id: c.peer_node_id,
            name: c.name.clone(),
            role: parse_role(&c.peer_role),
            connection: parse_connection(&c.connection_state),
            disk_state: c
                .peer_devices
                .first()
                .map(|d| d.peer_disk_state.clone())
                .unwrap_or_else(|| "DUnknown".to_string()),
            out_of_sync_kib: c.peer_devices.iter().map(|d| d.out_of_sync).sum(),
        })
        .collect();

    let connection = if peers.is_empty()
        || peers.iter().any(|p| p.connection == ConnectionState::StandAlone)
    {
        ConnectionState::StandAlone
    } else if peers.iter().all(|p| p.connection == ConnectionState::Connected) {
        ConnectionState::Connected
    } else {
        ConnectionState::Disconnected
    };

    let data = if peers.iter().any(|p| p.connection == ConnectionState::StandAlone) {
        DataState::Diverged
    } else if disk_state == UP_TO_DATE
        && peers
            .iter()
            .filter(|p| p.connection == ConnectionState::Connected)
            .all(|p| p.disk_state == UP_TO_DATE)
    {
        DataState::Consistent
    } else {
        DataState::Inconsistent
    };

    Ok(HAState {
        resource: status.name,
        role: parse_role(&status.role),
        connection,
        data,
        disk_state,
        peers,
        observed_at: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTED: &str = r#"[{
        "name": "pvc-1", "node-id": 0, "role": "Primary", "suspended": false,
        "write-ordering": "flush",
        "devices": [{
            "volume": 0, "minor": 1001, "disk-state": "UpToDate",
            "client": false, "quorum": true
        }],
        "connections": [{
            "peer-node-id": 1, "name": "node2", "connection-state": "Connected",
            "congested": false, "peer-role": "Secondary",
            "peer_devices": [{"volume": 0, "replication-state": "Established",
                "peer-disk-state": "UpToDate", "peer-client": false, "out-of-sync": 0,
                "percent-in-sync": 100.00}]
        }]
    }]"#;

    #[test]
    fn test_connected_primary() {
        let state = parse_status("pvc-1", CONNECTED).unwrap();
        assert_eq!(state.resource, "pvc-1");
        assert!(state.is_primary());
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.data, DataState::Consistent);
        assert!(state.is_healthy());
        assert_eq!(state.peers.len(), 1);
        assert_eq!(state.peers[0].name, "node2");
        assert_eq!(state.peers[0].role, ReplicaRole::Secondary);
    }

    #[test]
    fn test_single_node_is_standalone() {
        let json = r#"[{"name": "test1", "role": "Secondary",
            "devices": [{"volume": 0, "disk-state": "UpToDate"}], "connections": []}]"#;
        let state = parse_status("test1", json).unwrap();
        assert_eq!(state.role, ReplicaRole::Secondary);
        assert_eq!(state.connection, ConnectionState::StandAlone);
        assert_eq!(state.data, DataState::Consistent);
        assert!(state.is_healthy());
    }

    #[test]
    fn test_resync_in_progress() {
        let json = CONNECTED
            .replace("\"Established\"", "\"SyncSource\"")
            .replace("\"peer-disk-state\": \"UpToDate\"", "\"peer-disk-state\": \"Inconsistent\"")
            .replace("\"out-of-sync\": 0", "\"out-of-sync\": 2048");
        let state = parse_status("pvc-1", &json).unwrap();
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.data, DataState::Inconsistent);
        assert_eq!(state.peers[0].out_of_sync_kib, 2048);
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_disconnected_peer() {
        let json = CONNECTED
            .replace("\"Connected\"", "\"Connecting\"")
            .replace("\"peer-disk-state\": \"UpToDate\"", "\"peer-disk-state\": \"DUnknown\"");
        let state = parse_status("pvc-1", &json).unwrap();
        assert_eq!(state.connection, ConnectionState::Disconnected);
        assert_eq!(state.data, DataState::Consistent);
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_split_brain() {
        let json = CONNECTED.replace("\"Connected\"", "\"StandAlone\"");
        let state = parse_status("pvc-1", &json).unwrap();
        assert_eq!(state.connection, ConnectionState::StandAlone);
        assert_eq!(state.data, DataState::Diverged);
    }

    #[test]
    fn test_missing_resource() {
        let err = parse_status("other", CONNECTED).unwrap_err();
        assert!(err.is_not_found());
        assert!(parse_status("pvc-1", "[]").unwrap_err().is_not_found());
    }

    #[test]
    fn test_garbage() {
        let err = parse_status("pvc-1", "pvc-1 role:Primary").unwrap_err();
        assert!(matches!(err, EngineError::Status { .. }));
    }
}

//! Replicad Configuration
//!
//! This module provides configuration structures for the replicad
//! node agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::replica::{ReplicaDescriptor, VolumeConfig};
use crate::resource::{ConfigLayout, RenderSettings, DEFAULT_CONFIG_DIR};

/// Main agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Replication engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Background reconciliation configuration
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Replicas this node hosts at startup
    #[serde(default)]
    pub replicas: Vec<ReplicaManifest>,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name, as used in replica descriptors
    pub name: String,

    /// IP address the engine binds for replication traffic
    pub replication_address: String,
}

/// Replication engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding one resource file per replica
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Path of the drbdadm binary
    #[serde(default = "default_drbdadm")]
    pub drbdadm: String,

    /// Path of the drbdsetup binary
    #[serde(default = "default_drbdsetup")]
    pub drbdsetup: String,

    /// Timeout for a single engine command in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// First TCP port for replication links (port = base + resource id)
    #[serde(default = "default_port_base")]
    pub port_base: u16,

    /// First device minor (minor = base + resource id)
    #[serde(default = "default_minor_base")]
    pub minor_base: u32,

    /// Root under which pool volume groups are exposed
    #[serde(default = "default_device_root")]
    pub device_root: PathBuf,

    /// Peer slots reserved in the metadata of new resources
    #[serde(default = "default_max_peers")]
    pub max_peers: u8,
}

/// Background reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Run the consistency check loop
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between consistency checks
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// Replicas checked concurrently within one pass
    #[serde(default = "default_reconcile_concurrency")]
    pub concurrency: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// A replica declared in the agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaManifest {
    #[serde(flatten)]
    pub descriptor: ReplicaDescriptor,

    /// Desired volume configuration
    pub volume: VolumeConfig,
}

// Default value functions
fn default_config_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_DIR)
}

fn default_drbdadm() -> String {
    "drbdadm".to_string()
}

fn default_drbdsetup() -> String {
    "drbdsetup".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_port_base() -> u16 {
    43001
}

fn default_minor_base() -> u32 {
    1000
}

fn default_device_root() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_max_peers() -> u8 {
    7
}

fn default_true() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_reconcile_concurrency() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            drbdadm: default_drbdadm(),
            drbdsetup: default_drbdsetup(),
            command_timeout_secs: default_command_timeout(),
            port_base: default_port_base(),
            minor_base: default_minor_base(),
            device_root: default_device_root(),
            max_peers: default_max_peers(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval(),
            concurrency: default_reconcile_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.name.is_empty() {
            return Err(crate::Error::Config("node.name cannot be empty".into()));
        }

        if self.node.replication_address.is_empty() {
            return Err(crate::Error::Config(
                "node.replication_address cannot be empty".into(),
            ));
        }

        if self.engine.command_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "engine.command_timeout_secs must be positive".into(),
            ));
        }

        if self.reconcile.interval_secs == 0 {
            return Err(crate::Error::Config(
                "reconcile.interval_secs must be positive".into(),
            ));
        }

        if self.reconcile.concurrency == 0 {
            return Err(crate::Error::Config(
                "reconcile.concurrency must be positive".into(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for replica in &self.replicas {
            if replica.descriptor.node_name != self.node.name {
                return Err(crate::Error::Config(format!(
                    "replica {} is scheduled to {}, not this node",
                    replica.descriptor.name, replica.descriptor.node_name
                )));
            }
            if !names.insert(replica.descriptor.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "replica {} is declared more than once",
                    replica.descriptor.name
                )));
            }
        }

        Ok(())
    }

    /// Get the engine command timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.command_timeout_secs)
    }

    /// Get the reconcile interval as Duration
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.interval_secs)
    }

    /// Resource config directory layout
    pub fn layout(&self) -> ConfigLayout {
        ConfigLayout::new(self.engine.config_dir.clone())
    }

    /// Settings used to render resource files on this node
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            port_base: self.engine.port_base,
            minor_base: self.engine.minor_base,
            device_root: self.engine.device_root.clone(),
            local_address: self.node.replication_address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[node]
name = "node1"
replication_address = "10.0.0.1"

[engine]
config_dir = "/etc/drbd.d"
command_timeout_secs = 10

[reconcile]
interval_secs = 30

[[replicas]]
name = "pvc-1-node1"
volume_name = "pvc-1"
storage_pool_name = "LocalStorage_PoolHDD"
node_name = "node1"
required_capacity_bytes = 1073741824

[replicas.volume]
volume_name = "pvc-1"
required_capacity_bytes = 1073741824
resource_id = 3

[[replicas.volume.replicas]]
id = 0
hostname = "node1"
ip = "10.0.0.1"
primary = true

[[replicas.volume.replicas]]
id = 1
hostname = "node2"
ip = "10.0.0.2"
"#;

    #[test]
    fn test_parse_config() {
        let config = AgentConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.node.name, "node1");
        assert_eq!(config.command_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(30));
        assert_eq!(config.engine.port_base, 43001);
        assert_eq!(config.reconcile.concurrency, 4);

        assert_eq!(config.replicas.len(), 1);
        let replica = &config.replicas[0];
        assert_eq!(replica.descriptor.storage_pool_name, "LocalStorage_PoolHDD");
        assert_eq!(replica.volume.resource_id, 3);
        assert_eq!(replica.volume.replicas.len(), 2);
        assert!(replica.volume.replicas[0].primary);
        assert!(!replica.volume.replicas[1].primary);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AgentConfig::from_str(
            r#"
[node]
name = "node1"
replication_address = "10.0.0.1"
"#,
        )
        .unwrap();

        assert_eq!(config.engine.config_dir, PathBuf::from("/etc/drbd.d"));
        assert_eq!(config.engine.drbdadm, "drbdadm");
        assert_eq!(config.logging.level, "info");
        assert!(config.reconcile.enabled);
        assert!(config.replicas.is_empty());
    }

    #[test]
    fn test_rejects_foreign_replica() {
        let toml = SAMPLE.replace("node_name = \"node1\"", "node_name = \"node9\"");
        let err = AgentConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("node9"));
    }

    #[test]
    fn test_rejects_empty_node_name() {
        let err = AgentConfig::from_str(
            r#"
[node]
name = ""
replication_address = "10.0.0.1"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}

//! DRBD Engine Driver
//!
//! Drives DRBD through `drbdadm` and `drbdsetup`. Every `drbdadm` call is
//! pointed at the resource's own config file with `-c`, so the config
//! directory does not have to be included from `/etc/drbd.conf`.

use std::path::Path;

use super::runner::{command_line, CommandOutput, CommandRunner, SystemRunner};
use super::status::parse_status;
use super::{EngineError, EngineResult, ReplicationEngine};
use crate::config::AgentConfig;
use crate::replica::HAState;
use crate::resource::{parse_resource_name, ConfigLayout};

/// Engine messages meaning the resource is unknown
const MISSING_RESOURCE_MARKERS: &[&str] = &[
    "No such resource",
    "not defined in your config",
    "Unknown resource",
];

fn is_missing_resource(stderr: &str) -> bool {
    MISSING_RESOURCE_MARKERS.iter().any(|m| stderr.contains(m))
}

/// `get-gi` errors meaning the backing disk carries no metadata
const MISSING_METADATA_MARKERS: &[&str] = &["no valid meta data", "no valid meta-data"];

fn is_missing_metadata(err: &EngineError) -> bool {
    match err {
        EngineError::CommandFailed { stderr, .. } => {
            let stderr = stderr.to_lowercase();
            MISSING_METADATA_MARKERS.iter().any(|m| stderr.contains(m))
        }
        _ => false,
    }
}

/// DRBD implementation of the replication engine
pub struct DrbdEngine<R = SystemRunner> {
    runner: R,
    layout: ConfigLayout,
    drbdadm: String,
    drbdsetup: String,
    max_peers: u8,
}

impl DrbdEngine<SystemRunner> {
    /// Create an engine that runs the DRBD tools configured for this node
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::with_runner(
            SystemRunner::new(config.command_timeout()),
            config.layout(),
            config.engine.drbdadm.clone(),
            config.engine.drbdsetup.clone(),
            config.engine.max_peers,
        )
    }
}

impl<R: CommandRunner> DrbdEngine<R> {
    pub fn with_runner(
        runner: R,
        layout: ConfigLayout,
        drbdadm: String,
        drbdsetup: String,
        max_peers: u8,
    ) -> Self {
        Self {
            runner,
            layout,
            drbdadm,
            drbdsetup,
            max_peers,
        }
    }

    /// Run `drbdadm -c <config> <args..> <name>`
    async fn drbdadm(
        &self,
        config_path: &Path,
        name: &str,
        args: &[&str],
    ) -> EngineResult<CommandOutput> {
        let mut full = vec!["-c".to_string(), config_path.display().to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        full.push(name.to_string());
        self.checked(&self.drbdadm, name, full).await
    }

    async fn drbdsetup(&self, name: &str, args: Vec<String>) -> EngineResult<CommandOutput> {
        self.checked(&self.drbdsetup, name, args).await
    }

    async fn checked(
        &self,
        program: &str,
        name: &str,
        args: Vec<String>,
    ) -> EngineResult<CommandOutput> {
        let output = self.runner.run(program, &args).await?;
        if output.success() {
            return Ok(output);
        }

        if is_missing_resource(&output.stderr) {
            return Err(EngineError::NotFound(name.to_string()));
        }

        Err(EngineError::CommandFailed {
            command: command_line(program, &args),
            code: output.code,
            stderr: output.stderr,
        })
    }
}

#[async_trait::async_trait]
impl<R: CommandRunner> ReplicationEngine for DrbdEngine<R> {
    async fn create_resource(&self, config_path: &Path) -> EngineResult<()> {
        let name = parse_resource_name(config_path)
            .ok_or_else(|| EngineError::InvalidPath(config_path.to_path_buf()))?;

        // Existing metadata must survive; create-md --force would reset it
        match self.drbdadm(config_path, &name, &["get-gi"]).await {
            Ok(_) => {
                tracing::debug!("Metadata for {} already exists", name);
                return Ok(());
            }
            Err(e) if is_missing_metadata(&e) => {
                tracing::debug!("No metadata for {}: {}", name, e);
            }
            Err(e) => return Err(e),
        }

        let max_peers = format!("--max-peers={}", self.max_peers);
        self.drbdadm(config_path, &name, &["create-md", "--force", max_peers.as_str()])
            .await?;
        tracing::info!("Created metadata for resource {}", name);
        Ok(())
    }

    async fn enable_resource(&self, name: &str) -> EngineResult<()> {
        self.drbdadm(&self.layout.resolve(name), name, &["up"]).await?;
        tracing::info!("Resource {} is up", name);
        Ok(())
    }

    async fn adjust_resource(&self, name: &str) -> EngineResult<()> {
        self.drbdadm(&self.layout.resolve(name), name, &["adjust"]).await?;
        tracing::debug!("Adjusted resource {}", name);
        Ok(())
    }

    async fn disable_resource(&self, name: &str) -> EngineResult<()> {
        self.drbdsetup(name, vec!["down".to_string(), name.to_string()])
            .await?;
        tracing::info!("Resource {} is down", name);
        Ok(())
    }

    async fn remove_resource(&self, name: &str) -> EngineResult<()> {
        self.drbdadm(&self.layout.resolve(name), name, &["wipe-md", "--force"])
            .await?;
        tracing::info!("Wiped metadata of resource {}", name);
        Ok(())
    }

    async fn promote_resource(&self, name: &str, force: bool) -> EngineResult<()> {
        let args: &[&str] = if force {
            &["primary", "--force"]
        } else {
            &["primary"]
        };
        self.drbdadm(&self.layout.resolve(name), name, args).await?;
        tracing::info!("Promoted resource {} (force: {})", name, force);
        Ok(())
    }

    async fn demote_resource(&self, name: &str) -> EngineResult<()> {
        self.drbdadm(&self.layout.resolve(name), name, &["secondary"])
            .await?;
        tracing::info!("Demoted resource {}", name);
        Ok(())
    }

    async fn query_status(&self, name: &str) -> EngineResult<HAState> {
        let output = self
            .drbdsetup(
                name,
                vec!["status".to_string(), name.to_string(), "--json".to_string()],
            )
            .await?;
        parse_status(name, &output.stdout)
    }
}

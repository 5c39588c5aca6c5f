//! Replica Configurator
//!
//! Owns the config directory and drives the engine for every replica of
//! this node. The last configuration seen for each replica is cached so the
//! reconciliation loop can restore it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, RwLock};

use super::{Configurator, ResourceLocks};
use crate::config::AgentConfig;
use crate::engine::{EngineError, ReplicationEngine};
use crate::error::{Error, Result};
use crate::replica::{HAState, ReplicaDescriptor, ReplicaRole, VolumeConfig};
use crate::resource::{ConfigLayout, ConfigRenderer};

const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(1);

/// What the control plane last asked for
#[derive(Debug, Clone)]
pub(super) struct DesiredReplica {
    pub descriptor: ReplicaDescriptor,
    pub config: Option<VolumeConfig>,
}

/// Configurator for the replicas hosted on this node
pub struct ReplicaConfigurator<E> {
    pub(super) layout: ConfigLayout,
    pub(super) renderer: ConfigRenderer,
    pub(super) engine: E,
    pub(super) locks: ResourceLocks,
    pub(super) desired: RwLock<HashMap<String, DesiredReplica>>,
    pub(super) interval: Duration,
    pub(super) concurrency: usize,
}

impl<E: ReplicationEngine> ReplicaConfigurator<E> {
    pub fn new(layout: ConfigLayout, renderer: ConfigRenderer, engine: E) -> Self {
        Self {
            layout,
            renderer,
            engine,
            locks: ResourceLocks::new(),
            desired: RwLock::new(HashMap::new()),
            interval: Duration::from_secs(60),
            concurrency: 4,
        }
    }

    /// Create a configurator from the agent configuration
    pub fn from_config(config: &AgentConfig, engine: E) -> Self {
        Self::new(config.layout(), ConfigRenderer::new(config.render_settings()), engine)
            .with_reconcile(config.reconcile_interval(), config.reconcile.concurrency)
    }

    /// Set the reconciliation period and how many replicas a pass checks at once
    ///
    /// The period is at least one millisecond.
    pub fn with_reconcile(mut self, interval: Duration, concurrency: usize) -> Self {
        self.interval = interval.max(MIN_RECONCILE_INTERVAL);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn layout(&self) -> &ConfigLayout {
        &self.layout
    }

    /// Make a replica known to the reconciliation loop without touching it
    pub async fn register(&self, descriptor: ReplicaDescriptor, config: Option<VolumeConfig>) {
        self.desired.write().await.insert(
            descriptor.name.clone(),
            DesiredReplica { descriptor, config },
        );
    }

    /// Replicas the reconciliation loop keeps in shape, sorted by name
    pub async fn known_replicas(&self) -> Vec<ReplicaDescriptor> {
        let mut replicas: Vec<ReplicaDescriptor> = self
            .desired
            .read()
            .await
            .values()
            .map(|d| d.descriptor.clone())
            .collect();
        replicas.sort_by(|a, b| a.name.cmp(&b.name));
        replicas
    }

    pub(super) async fn desired_config(&self, name: &str) -> Option<VolumeConfig> {
        self.desired.read().await.get(name).and_then(|d| d.config.clone())
    }

    async fn remember(&self, replica: &ReplicaDescriptor, config: &VolumeConfig) {
        let mut config = config.clone();
        // once promoted, the volume stays initialized for this configurator
        config.initialized |= self.was_initialized(&replica.name).await;
        self.register(replica.clone(), Some(config)).await;
    }

    async fn was_initialized(&self, name: &str) -> bool {
        self.desired
            .read()
            .await
            .get(name)
            .and_then(|d| d.config.as_ref())
            .map_or(false, |c| c.initialized)
    }

    async fn mark_initialized(&self, name: &str) {
        if let Some(config) = self
            .desired
            .write()
            .await
            .get_mut(name)
            .and_then(|d| d.config.as_mut())
        {
            config.initialized = true;
        }
    }

    async fn forget(&self, name: &str) {
        self.desired.write().await.remove(name);
    }

    pub(super) async fn config_exists(&self, replica: &ReplicaDescriptor) -> bool {
        tokio::fs::metadata(self.layout.resolve(&replica.name))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Current config text, `None` when missing or unreadable
    async fn read_config(&self, replica: &ReplicaDescriptor) -> Option<String> {
        let path = self.layout.resolve(&replica.name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Whether the config on disk must be (re)written for `config`
    pub(super) async fn needs_write(
        &self,
        replica: &ReplicaDescriptor,
        config: &VolumeConfig,
    ) -> Result<bool> {
        match self.read_config(replica).await {
            Some(existing) => Ok(!self.renderer.matches_rendered(&existing, replica, config)?),
            None => Ok(true),
        }
    }

    /// Replace the config file atomically
    async fn write_config(&self, replica: &ReplicaDescriptor, text: &str) -> Result<()> {
        let path = self.layout.resolve(&replica.name);
        let temp = self.layout.temp_path(&replica.name);

        let written = async {
            tokio::fs::create_dir_all(self.layout.dir()).await?;
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(text.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp, &path).await
        }
        .await;

        if let Err(source) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::ConfigWriteFailed {
                resource: replica.name.clone(),
                path,
                source,
            });
        }

        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Engine state of a resource, `None` when the engine does not run it
    pub(super) async fn engine_state(&self, name: &str) -> Result<Option<HAState>> {
        match self.engine.query_status(name).await {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(Error::EngineQueryFailed {
                resource: name.to_string(),
                source,
            }),
        }
    }

    /// Prepare metadata and bring a configured resource up
    pub(super) async fn activate(&self, replica: &ReplicaDescriptor) -> Result<()> {
        let activation = |operation: &'static str| {
            move |source: EngineError| Error::EngineActivationFailed {
                resource: replica.name.clone(),
                operation,
                source,
            }
        };

        self.engine
            .create_resource(&self.layout.resolve(&replica.name))
            .await
            .map_err(activation("create"))?;
        self.engine
            .enable_resource(&replica.name)
            .await
            .map_err(activation("enable"))?;
        tracing::info!("Activated resource {}", replica.name);
        Ok(())
    }

    /// Promote or demote so the local role follows the topology
    ///
    /// Returns whether the role had to change. Only the first promotion of
    /// an uninitialized volume is forced.
    pub(super) async fn ensure_role(
        &self,
        replica: &ReplicaDescriptor,
        config: &VolumeConfig,
        current: ReplicaRole,
    ) -> Result<bool> {
        let Some(local) = config.peer(&replica.node_name) else {
            return Ok(false);
        };

        if local.primary && current != ReplicaRole::Primary {
            // Fresh data has no up-to-date copy anywhere yet
            let force = !config.initialized && !self.was_initialized(&replica.name).await;
            self.engine
                .promote_resource(&replica.name, force)
                .await
                .map_err(|source| Error::EngineActivationFailed {
                    resource: replica.name.clone(),
                    operation: "promote",
                    source,
                })?;
            if force {
                self.mark_initialized(&replica.name).await;
            }
            return Ok(true);
        }

        if !local.primary && current == ReplicaRole::Primary {
            self.engine
                .demote_resource(&replica.name)
                .await
                .map_err(|source| Error::EngineActivationFailed {
                    resource: replica.name.clone(),
                    operation: "demote",
                    source,
                })?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Write the config if needed and bring the engine in line with it
    ///
    /// A running resource is adjusted when the file changed, or always when
    /// `force_adjust` is set.
    pub(super) async fn converge(
        &self,
        replica: &ReplicaDescriptor,
        config: &VolumeConfig,
        force_adjust: bool,
    ) -> Result<()> {
        let text = self.renderer.render(replica, config)?;
        self.remember(replica, config).await;

        let rewritten = self.needs_write(replica, config).await?;
        if rewritten {
            self.write_config(replica, &text).await?;
            tracing::info!("Config for {} written", replica.name);
        }

        let role = match self.engine_state(&replica.name).await? {
            Some(state) => {
                if rewritten || force_adjust {
                    self.engine
                        .adjust_resource(&replica.name)
                        .await
                        .map_err(|source| Error::EngineActivationFailed {
                            resource: replica.name.clone(),
                            operation: "adjust",
                            source,
                        })?;
                }
                state.role
            }
            None => {
                self.activate(replica).await?;
                ReplicaRole::Secondary
            }
        };

        self.ensure_role(replica, config, role).await?;
        Ok(())
    }

    async fn teardown(&self, replica: &ReplicaDescriptor) -> Result<()> {
        let had_config = self.config_exists(replica).await;
        let teardown = |operation: &'static str| {
            move |source: EngineError| Error::EngineTeardownFailed {
                resource: replica.name.clone(),
                operation,
                source,
            }
        };

        match self.engine.disable_resource(&replica.name).await {
            Err(e) if !e.is_not_found() => return Err(teardown("disable")(e)),
            _ => {}
        }

        // Without a config file the engine cannot address the metadata
        if had_config {
            match self.engine.remove_resource(&replica.name).await {
                Err(e) if !e.is_not_found() => return Err(teardown("remove")(e)),
                _ => {}
            }
        }

        let path = self.layout.resolve(&replica.name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!("Removed config for {}", replica.name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(Error::ConfigWriteFailed {
                    resource: replica.name.clone(),
                    path,
                    source,
                })
            }
        }
        let _ = tokio::fs::remove_file(self.layout.temp_path(&replica.name)).await;

        self.forget(&replica.name).await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<E: ReplicationEngine> Configurator for ReplicaConfigurator<E> {
    async fn run(&self, stop: watch::Receiver<bool>) {
        self.run_loop(stop).await
    }

    async fn has_config(&self, replica: &ReplicaDescriptor) -> bool {
        self.config_exists(replica).await
    }

    async fn is_config_updated(&self, replica: &ReplicaDescriptor, config: &VolumeConfig) -> bool {
        match self.needs_write(replica, config).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!("Cannot compare config for {}: {}", replica.name, e);
                true
            }
        }
    }

    async fn initialize(&self, replica: &ReplicaDescriptor, config: &VolumeConfig) -> Result<()> {
        let _guard = self.locks.lock(&replica.name).await;
        tracing::info!("Initializing replica {}", replica.name);
        self.converge(replica, config, false).await
    }

    async fn apply_config(&self, replica: &ReplicaDescriptor, config: &VolumeConfig) -> Result<()> {
        let _guard = self.locks.lock(&replica.name).await;
        if !self.config_exists(replica).await {
            tracing::info!("No config for {}, initializing", replica.name);
            return self.converge(replica, config, false).await;
        }
        self.converge(replica, config, true).await
    }

    async fn delete_config(&self, replica: &ReplicaDescriptor) -> Result<()> {
        let _guard = self.locks.lock(&replica.name).await;
        tracing::info!("Deleting replica {}", replica.name);
        self.teardown(replica).await
    }

    async fn consistency_check(&self, replicas: &[ReplicaDescriptor]) {
        self.check_replicas(replicas).await;
    }

    async fn get_replica_ha_state(&self, replica: &ReplicaDescriptor) -> Result<HAState> {
        if !self.config_exists(replica).await {
            return Err(Error::ResourceNotActive(replica.name.clone()));
        }
        self.engine_state(&replica.name)
            .await?
            .ok_or_else(|| Error::ResourceNotActive(replica.name.clone()))
    }
}

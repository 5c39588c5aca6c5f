//! Consistency checks and the reconciliation loop

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::{Inconsistency, ReplicaConfigurator};
use crate::engine::ReplicationEngine;
use crate::error::{Error, Result};
use crate::replica::{ReplicaDescriptor, ReplicaRole};

/// Outcome counts of one consistency pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub checked: usize,
    pub consistent: usize,
    pub repaired: usize,
    pub failed: usize,
    /// Config files with no matching replica
    pub orphaned: usize,
}

impl<E: ReplicationEngine> ReplicaConfigurator<E> {
    /// Verify every replica and repair what can be repaired
    ///
    /// Replicas are checked independently, a failure on one never stops the
    /// others.
    pub async fn check_replicas(&self, replicas: &[ReplicaDescriptor]) -> CheckSummary {
        let checks: Vec<_> = replicas
            .iter()
            .map(|replica| async move { (replica.name.clone(), self.check_replica(replica).await) })
            .collect();
        let results: Vec<(String, Result<Option<Inconsistency>>)> = stream::iter(checks)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = CheckSummary {
            checked: results.len(),
            ..Default::default()
        };
        for (name, result) in results {
            match result {
                Ok(None) => summary.consistent += 1,
                Ok(Some(issue)) => {
                    tracing::info!("Repaired {}: {}", name, issue);
                    summary.repaired += 1;
                }
                Err(e) => {
                    tracing::warn!("Replica {} is inconsistent: {}", name, e);
                    summary.failed += 1;
                }
            }
        }

        summary.orphaned = self.report_orphans(replicas).await;

        tracing::info!(
            "Consistency check: {} checked, {} consistent, {} repaired, {} failed",
            summary.checked,
            summary.consistent,
            summary.repaired,
            summary.failed
        );
        summary
    }

    /// Check one replica, returning what was repaired
    async fn check_replica(&self, replica: &ReplicaDescriptor) -> Result<Option<Inconsistency>> {
        let _guard = self.locks.lock(&replica.name).await;
        let desired = self.desired_config(&replica.name).await;

        if !self.config_exists(replica).await {
            let Some(config) = desired else {
                return Err(Error::Inconsistent {
                    resource: replica.name.clone(),
                    reason: Inconsistency::ConfigMissing,
                });
            };
            self.converge(replica, &config, false).await?;
            return Ok(Some(Inconsistency::ConfigMissing));
        }

        if let Some(config) = &desired {
            if self.needs_write(replica, config).await? {
                self.converge(replica, config, true).await?;
                return Ok(Some(Inconsistency::ConfigStale));
            }
        }

        match self.engine_state(&replica.name).await? {
            Some(state) => {
                if !state.is_healthy() {
                    tracing::warn!(
                        "Resource {} is degraded: {} {} ({})",
                        replica.name,
                        state.connection,
                        state.data,
                        state.disk_state
                    );
                }
                if let Some(config) = &desired {
                    if self.ensure_role(replica, config, state.role).await? {
                        return Ok(Some(Inconsistency::RoleMismatch));
                    }
                }
                Ok(None)
            }
            None => {
                self.activate(replica).await?;
                if let Some(config) = &desired {
                    self.ensure_role(replica, config, ReplicaRole::Secondary).await?;
                }
                Ok(Some(Inconsistency::ResourceNotActive))
            }
        }
    }

    /// Log config files that belong to no known replica
    async fn report_orphans(&self, replicas: &[ReplicaDescriptor]) -> usize {
        let known: HashSet<&str> = replicas.iter().map(|r| r.name.as_str()).collect();
        let on_disk = match self.layout.list_resources().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Cannot list {}: {}", self.layout.dir().display(), e);
                return 0;
            }
        };

        let mut orphaned = 0;
        for name in on_disk.iter().filter(|n| !known.contains(n.as_str())) {
            tracing::warn!("Config for unknown resource {} needs cleanup", name);
            orphaned += 1;
        }
        orphaned
    }

    /// Run consistency passes until `stop` turns true or its sender goes away
    ///
    /// A pass in progress always completes before the loop exits.
    pub(super) async fn run_loop(&self, mut stop: watch::Receiver<bool>) {
        tracing::info!("Reconciliation loop started (every {:?})", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let replicas = self.known_replicas().await;
                    if !replicas.is_empty() {
                        self.check_replicas(&replicas).await;
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reconciliation loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::configurator::testing::{config, configurator, replica, replicated_config};
    use crate::configurator::Configurator;
    use crate::engine::ReplicationEngine;
    use crate::resource::render_spec;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_consistent_replicas_untouched() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let replicas = vec![replica("test1"), replica("test2")];
        for r in &replicas {
            configurator.initialize(r, &config()).await.unwrap();
        }
        engine.clear_calls();

        let summary = configurator.check_replicas(&replicas).await;
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.consistent, 2);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_resource_restarted() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let replicas = vec![replica("test1"), replica("test2")];
        for r in &replicas {
            configurator.initialize(r, &config()).await.unwrap();
        }
        engine.crash("test1");
        engine.clear_calls();

        configurator.consistency_check(&replicas).await;

        assert!(engine.is_up("test1"));
        assert!(engine.is_up("test2"));
        assert_eq!(engine.calls(), vec!["create test1", "enable test1"]);
    }

    #[tokio::test]
    async fn test_restarted_primary_is_promoted() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let replica = replica("pvc-1");
        let mut config = replicated_config("node1");
        config.initialized = true;

        configurator.initialize(&replica, &config).await.unwrap();
        engine.crash("pvc-1");
        engine.clear_calls();

        let summary = configurator.check_replicas(&[replica]).await;
        assert_eq!(summary.repaired, 1);
        assert_eq!(engine.role("pvc-1"), Some(ReplicaRole::Primary));
        assert!(engine.calls().contains(&"promote pvc-1".to_string()));
    }

    #[tokio::test]
    async fn test_restart_does_not_force_promotion_again() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let replica = replica("pvc-1");

        configurator
            .initialize(&replica, &replicated_config("node1"))
            .await
            .unwrap();
        engine.crash("pvc-1");
        engine.clear_calls();

        let summary = configurator.check_replicas(&[replica]).await;
        assert_eq!(summary.repaired, 1);
        assert_eq!(engine.role("pvc-1"), Some(ReplicaRole::Primary));
        assert_eq!(
            engine.calls(),
            vec!["create pvc-1", "enable pvc-1", "promote pvc-1"]
        );
    }

    #[tokio::test]
    async fn test_role_drift_corrected() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let replica = replica("pvc-1");

        configurator
            .initialize(&replica, &replicated_config("node1"))
            .await
            .unwrap();
        engine.demote_resource("pvc-1").await.unwrap();
        engine.clear_calls();

        let summary = configurator.check_replicas(&[replica.clone()]).await;
        assert_eq!(summary.repaired, 1);
        assert_eq!(summary.consistent, 0);
        assert_eq!(engine.role("pvc-1"), Some(ReplicaRole::Primary));
        assert_eq!(engine.calls(), vec!["promote pvc-1"]);

        // a second pass finds nothing to do
        engine.clear_calls();
        let summary = configurator.check_replicas(&[replica]).await;
        assert_eq!(summary.consistent, 1);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_config_restored() {
        let dir = TempDir::new().unwrap();
        let (configurator, _engine) = configurator(dir.path());
        let replica = replica("test1");

        configurator.initialize(&replica, &config()).await.unwrap();
        std::fs::remove_file(dir.path().join("test1.res")).unwrap();

        let summary = configurator.check_replicas(&[replica.clone()]).await;
        assert_eq!(summary.repaired, 1);
        assert!(configurator.has_config(&replica).await);
        assert!(!configurator.is_config_updated(&replica, &config()).await);
    }

    #[tokio::test]
    async fn test_stale_config_reapplied() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let replica = replica("test1");

        configurator.initialize(&replica, &config()).await.unwrap();

        // someone edits the file by hand
        let mut drifted = configurator
            .renderer
            .desired(&replica, &config())
            .unwrap();
        drifted.capacity_bytes = 1;
        std::fs::write(dir.path().join("test1.res"), render_spec(&drifted)).unwrap();
        engine.clear_calls();

        let summary = configurator.check_replicas(&[replica.clone()]).await;
        assert_eq!(summary.repaired, 1);
        assert!(!configurator.is_config_updated(&replica, &config()).await);
        assert_eq!(engine.calls(), vec!["adjust test1"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_block_other_replicas() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let known = replica("test1");
        configurator.initialize(&known, &config()).await.unwrap();
        engine.crash("test1");

        // never initialized, nothing to restore from
        let unknown = replica("test2");

        let summary = configurator.check_replicas(&[unknown, known]).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.repaired, 1);
        assert!(engine.is_up("test1"));
    }

    #[tokio::test]
    async fn test_engine_errors_counted_as_failures() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let replica = replica("test1");
        configurator.initialize(&replica, &config()).await.unwrap();
        engine.crash("test1");
        engine.fail("enable");

        let summary = configurator.check_replicas(&[replica]).await;
        assert_eq!(summary.failed, 1);
        assert!(!engine.is_up("test1"));
    }

    #[tokio::test]
    async fn test_orphaned_configs_reported() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let replica = replica("test1");
        configurator.initialize(&replica, &config()).await.unwrap();
        std::fs::write(dir.path().join("leftover.res"), "resource leftover {}\n").unwrap();
        engine.clear_calls();

        let summary = configurator.check_replicas(&[replica]).await;
        assert_eq!(summary.orphaned, 1);
        assert!(dir.path().join("leftover.res").exists());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_repairs_until_stopped() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        let configurator = Arc::new(configurator);
        configurator.initialize(&replica("test1"), &config()).await.unwrap();
        engine.crash("test1");

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn({
            let configurator = Arc::clone(&configurator);
            async move { configurator.run(stop_rx).await }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while !engine.is_up("test1") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_exits_when_sender_dropped() {
        let dir = TempDir::new().unwrap();
        let (configurator, _engine) = configurator(dir.path());

        let (stop_tx, stop_rx) = watch::channel(false);
        drop(stop_tx);

        tokio::time::timeout(Duration::from_secs(1), configurator.run(stop_rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_already_stopped() {
        let dir = TempDir::new().unwrap();
        let (configurator, engine) = configurator(dir.path());
        configurator.register(replica("test1"), Some(config())).await;

        let (_stop_tx, stop_rx) = watch::channel(true);
        tokio::time::timeout(Duration::from_secs(1), configurator.run(stop_rx))
            .await
            .unwrap();
        assert!(engine.calls().is_empty());
    }
}

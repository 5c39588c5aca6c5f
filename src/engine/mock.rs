//! In-memory engine for tests

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use super::{EngineError, EngineResult, ReplicationEngine};
use crate::replica::{ConnectionState, DataState, HAState, ReplicaRole};
use crate::resource::parse_resource_name;

#[derive(Debug, Clone)]
struct MockResource {
    up: bool,
    role: ReplicaRole,
}

#[derive(Default)]
struct MockState {
    resources: HashMap<String, MockResource>,
    calls: Vec<String>,
    failing: HashSet<&'static str>,
}

/// Tracks resources the way the engine would and records every mutation
#[derive(Default)]
pub(crate) struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an operation fail until `recover` is called
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.remove(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .resources
            .get(name)
            .map(|r| r.up)
            .unwrap_or(false)
    }

    pub fn role(&self, name: &str) -> Option<ReplicaRole> {
        self.state
            .lock()
            .unwrap()
            .resources
            .get(name)
            .filter(|r| r.up)
            .map(|r| r.role)
    }

    /// Simulate a resource going down behind the configurator's back
    pub fn crash(&self, name: &str) {
        if let Some(resource) = self.state.lock().unwrap().resources.get_mut(name) {
            resource.up = false;
        }
    }

    fn record(&self, operation: &'static str, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", operation, name));
        if state.failing.contains(operation) {
            return Err(EngineError::CommandFailed {
                command: format!("mock {} {}", operation, name),
                code: Some(10),
                stderr: format!("{} rejected", operation),
            });
        }
        Ok(())
    }

    fn with_resource<T>(
        &self,
        name: &str,
        require_up: bool,
        f: impl FnOnce(&mut MockResource) -> T,
    ) -> EngineResult<T> {
        let mut state = self.state.lock().unwrap();
        match state.resources.get_mut(name) {
            Some(resource) if resource.up || !require_up => Ok(f(resource)),
            _ => Err(EngineError::NotFound(name.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl ReplicationEngine for MockEngine {
    async fn create_resource(&self, config_path: &Path) -> EngineResult<()> {
        let name = parse_resource_name(config_path)
            .ok_or_else(|| EngineError::InvalidPath(config_path.to_path_buf()))?;
        self.record("create", &name)?;
        if !config_path.exists() {
            return Err(EngineError::CommandFailed {
                command: format!("mock create {}", name),
                code: Some(1),
                stderr: "config file missing".to_string(),
            });
        }
        self.state
            .lock()
            .unwrap()
            .resources
            .entry(name)
            .or_insert(MockResource {
                up: false,
                role: ReplicaRole::Secondary,
            });
        Ok(())
    }

    async fn enable_resource(&self, name: &str) -> EngineResult<()> {
        self.record("enable", name)?;
        self.with_resource(name, false, |r| {
            r.up = true;
            r.role = ReplicaRole::Secondary;
        })
    }

    async fn adjust_resource(&self, name: &str) -> EngineResult<()> {
        self.record("adjust", name)?;
        self.with_resource(name, false, |r| r.up = true)
    }

    async fn disable_resource(&self, name: &str) -> EngineResult<()> {
        self.record("disable", name)?;
        self.with_resource(name, true, |r| r.up = false)
    }

    async fn remove_resource(&self, name: &str) -> EngineResult<()> {
        self.record("remove", name)?;
        self.state
            .lock()
            .unwrap()
            .resources
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    async fn promote_resource(&self, name: &str, force: bool) -> EngineResult<()> {
        self.record(if force { "force-promote" } else { "promote" }, name)?;
        self.with_resource(name, true, |r| r.role = ReplicaRole::Primary)
    }

    async fn demote_resource(&self, name: &str) -> EngineResult<()> {
        self.record("demote", name)?;
        self.with_resource(name, true, |r| r.role = ReplicaRole::Secondary)
    }

    async fn query_status(&self, name: &str) -> EngineResult<HAState> {
        if self.state.lock().unwrap().failing.contains("status") {
            return Err(EngineError::Timeout {
                command: format!("mock status {}", name),
                timeout: std::time::Duration::from_secs(1),
            });
        }
        let role = self.with_resource(name, true, |r| r.role)?;
        Ok(HAState {
            resource: name.to_string(),
            role,
            connection: ConnectionState::StandAlone,
            data: DataState::Consistent,
            disk_state: "UpToDate".to_string(),
            peers: Vec::new(),
            observed_at: chrono::Utc::now(),
        })
    }
}

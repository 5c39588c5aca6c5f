//! Replication Engine Module
//!
//! Drives the external block replication engine. Everything that knows
//! about engine commands and their output lives below this module.

mod drbd;
mod runner;
mod status;

#[cfg(test)]
pub(crate) mod mock;

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::replica::HAState;

pub use drbd::DrbdEngine;
pub use runner::{command_line, CommandOutput, CommandRunner, SystemRunner};
pub use status::parse_status;

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Engine driver error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine does not know the resource
    #[error("resource {0} does not exist")]
    NotFound(String),

    #[error("`{command}` failed with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unreadable status for {resource}: {reason}")]
    Status { resource: String, reason: String },

    #[error("{} is not a resource config path", .0.display())]
    InvalidPath(PathBuf),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "signal".to_string(),
    }
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }

    /// Check if a later attempt may succeed without intervention
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::CommandFailed { .. }
        )
    }
}

/// Control surface of a replication engine
///
/// `NotFound` is reported for resources the engine does not know; callers
/// treat it as a state, not a failure.
#[async_trait::async_trait]
pub trait ReplicationEngine: Send + Sync {
    /// Prepare engine metadata for the resource described by a config file
    async fn create_resource(&self, config_path: &Path) -> EngineResult<()>;

    /// Bring a resource up
    async fn enable_resource(&self, name: &str) -> EngineResult<()>;

    /// Reconcile a running resource with its config file
    async fn adjust_resource(&self, name: &str) -> EngineResult<()>;

    /// Take a resource down
    async fn disable_resource(&self, name: &str) -> EngineResult<()>;

    /// Drop the engine metadata of a resource that is down
    async fn remove_resource(&self, name: &str) -> EngineResult<()>;

    /// Make the local replica primary
    async fn promote_resource(&self, name: &str, force: bool) -> EngineResult<()>;

    /// Make the local replica secondary
    async fn demote_resource(&self, name: &str) -> EngineResult<()>;

    /// Current HA state of a running resource
    async fn query_status(&self, name: &str) -> EngineResult<HAState>;
}

#[async_trait::async_trait]
impl<E: ReplicationEngine + ?Sized> ReplicationEngine for std::sync::Arc<E> {
    async fn create_resource(&self, config_path: &Path) -> EngineResult<()> {
        (**self).create_resource(config_path).await
    }

    async fn enable_resource(&self, name: &str) -> EngineResult<()> {
        (**self).enable_resource(name).await
    }

    async fn adjust_resource(&self, name: &str) -> EngineResult<()> {
        (**self).adjust_resource(name).await
    }

    async fn disable_resource(&self, name: &str) -> EngineResult<()> {
        (**self).disable_resource(name).await
    }

    async fn remove_resource(&self, name: &str) -> EngineResult<()> {
        (**self).remove_resource(name).await
    }

    async fn promote_resource(&self, name: &str, force: bool) -> EngineResult<()> {
        (**self).promote_resource(name, force).await
    }

    async fn demote_resource(&self, name: &str) -> EngineResult<()> {
        (**self).demote_resource(name).await
    }

    async fn query_status(&self, name: &str) -> EngineResult<HAState> {
        (**self).query_status(name).await
    }
}

//! Replicad Error Types

use std::path::PathBuf;
use thiserror::Error;

use crate::configurator::Inconsistency;
use crate::engine::EngineError;

/// Result type alias for replicad operations
pub type Result<T> = std::result::Result<T, Error>;

/// Replicad error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid volume config for {resource}: {reason}")]
    InvalidVolumeConfig { resource: String, reason: String },

    // Resource config file errors
    #[error("Failed to persist config for {resource} at {}: {source}", path.display())]
    ConfigWriteFailed {
        resource: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Engine errors
    #[error("Engine failed to {operation} resource {resource}: {source}")]
    EngineActivationFailed {
        resource: String,
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("Engine failed to {operation} resource {resource}: {source}")]
    EngineTeardownFailed {
        resource: String,
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("Engine status query for {resource} failed: {source}")]
    EngineQueryFailed {
        resource: String,
        #[source]
        source: EngineError,
    },

    #[error("Resource {0} is not active")]
    ResourceNotActive(String),

    #[error("Resource {resource} is inconsistent: {reason}")]
    Inconsistent {
        resource: String,
        reason: Inconsistency,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is worth retrying on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConfigWriteFailed { .. } | Error::Inconsistent { .. } | Error::Io(_) => true,
            Error::EngineActivationFailed { source, .. }
            | Error::EngineTeardownFailed { source, .. }
            | Error::EngineQueryFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Name of the resource this error relates to, if any
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::InvalidVolumeConfig { resource, .. }
            | Error::ConfigWriteFailed { resource, .. }
            | Error::EngineActivationFailed { resource, .. }
            | Error::EngineTeardownFailed { resource, .. }
            | Error::EngineQueryFailed { resource, .. }
            | Error::Inconsistent { resource, .. } => Some(resource),
            Error::ResourceNotActive(resource) => Some(resource),
            _ => None,
        }
    }
}

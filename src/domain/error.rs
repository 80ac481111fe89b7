//! Errors surfaced by the resource library.

use std::path::PathBuf;

use thiserror::Error;

use super::resource::{ResourceDomain, ResourceType};

pub type Result<T, E = ResourceError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Non-{expected} resource at {path} (domain={actual}, type={actual_type})")]
    DomainMismatch {
        path: PathBuf,
        expected: ResourceDomain,
        actual: ResourceDomain,
        actual_type: ResourceType,
    },

    #[error("Cannot import a directory as a resource: {0}")]
    ImportDirectoryRejected(PathBuf),

    #[error("Failed to parse resource {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Library at {0} is already in use by another process")]
    Locked(PathBuf),

    #[error("Domain {0} failed to load: {1}")]
    LoadFailed(ResourceDomain, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ResourceError {
    pub fn parse(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

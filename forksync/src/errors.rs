//! Error types for forksync

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for forksync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Working tree of {project} has uncommitted changes: {}", files.join(", "))]
    DirtyWorkingTree { project: String, files: Vec<String> },

    #[error("Push to origin rejected: {0}")]
    PushRejected(String),

    #[error("Remote '{remote}' could not be set to {url}: {reason}")]
    RemoteMismatch {
        remote: String,
        url: String,
        reason: String,
    },

    #[error("Merge conflict requires manual resolution: {}", files.join(", "))]
    MergeConflict { files: Vec<String> },

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Checkpoint '{label}' not found for {project}")]
    CheckpointNotFound { project: String, label: String },

    #[error("Rollback of {project} would discard uncommitted changes: {}", files.join(", "))]
    RollbackConflict { project: String, files: Vec<String> },

    #[error("Invalid rollback target: {0}")]
    InvalidRollbackTarget(String),

    #[error("Hook '{command}' failed: {reason}")]
    HookFailed { command: String, reason: String },

    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Another forksync instance (pid {pid}) holds {}", path.display())]
    LockHeld { pid: u32, path: PathBuf },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error classification stored in run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigError,
    NetworkError,
    DirtyWorkingTreeError,
    PushRejectedError,
    RemoteMismatchError,
    MergeConflictError,
    DeploymentError,
    CheckpointNotFoundError,
    RollbackConflictError,
    HookError,
    TimeoutError,
    CancelledError,
    InternalError,
}

impl SyncError {
    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ConfigError(_) | SyncError::TomlError(_) => ErrorKind::ConfigError,
            SyncError::NetworkError(_) => ErrorKind::NetworkError,
            SyncError::DirtyWorkingTree { .. } => ErrorKind::DirtyWorkingTreeError,
            SyncError::PushRejected(_) => ErrorKind::PushRejectedError,
            SyncError::RemoteMismatch { .. } => ErrorKind::RemoteMismatchError,
            SyncError::MergeConflict { .. } => ErrorKind::MergeConflictError,
            SyncError::DeployError(_) => ErrorKind::DeploymentError,
            SyncError::CheckpointNotFound { .. } => ErrorKind::CheckpointNotFoundError,
            SyncError::RollbackConflict { .. } | SyncError::InvalidRollbackTarget(_) => {
                ErrorKind::RollbackConflictError
            }
            SyncError::HookFailed { .. } => ErrorKind::HookError,
            SyncError::Timeout { .. } => ErrorKind::TimeoutError,
            SyncError::Cancelled => ErrorKind::CancelledError,
            SyncError::IoError(_)
            | SyncError::JsonError(_)
            | SyncError::CommandFailed { .. }
            | SyncError::LockHeld { .. }
            | SyncError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = SyncError::DirtyWorkingTree {
            project: "a".to_string(),
            files: vec!["M src/lib.rs".to_string()],
        };
        assert_eq!(err.kind(), ErrorKind::DirtyWorkingTreeError);
        assert!(err.to_string().contains("src/lib.rs"));

        assert_eq!(SyncError::Cancelled.kind(), ErrorKind::CancelledError);
        assert_eq!(
            SyncError::InvalidRollbackTarget("x".into()).kind(),
            ErrorKind::RollbackConflictError
        );
    }

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::PushRejectedError).unwrap();
        assert_eq!(json, "\"PushRejectedError\"");
    }
}

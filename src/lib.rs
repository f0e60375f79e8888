//! PostgreSQL backup and restore orchestration for containerized databases.
//!
//! The target database runs inside a Docker container or a Kubernetes pod;
//! all dump and restore traffic goes through the backend's exec facility, so
//! the host never needs PostgreSQL client tools or a direct connection.

use std::time::Duration;

use thiserror::Error;

pub mod cli;
pub mod common;
pub mod config;
pub mod environment;
pub mod handlers;
pub mod orchestrator;
pub mod restore;
pub mod retention;
pub mod runner;
pub mod store;
pub mod strategy;
pub mod versioning;

pub use common::{ArtifactInfo, BackupKind, RequestedKind, RetentionBucket, SidecarRecord};
pub use environment::Environment;
pub use orchestrator::Orchestrator;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("target '{0}' is not running")]
    TargetNotRunning(String),

    #[error("command exited with status {exit}: {stderr}")]
    ExecNonZero { exit: i32, stderr: String },

    #[error("command timed out after {0:?}")]
    ExecTimeout(Duration),

    #[error("invalid backup name: {0}")]
    NameInvalid(String),

    #[error("'{0}' is a reserved file name")]
    NameReserved(String),

    #[error("backup '{0}' already exists (pass --force to overwrite)")]
    NameCollision(String),

    #[error("backup validation failed: {0}")]
    ValidationFailed(String),

    #[error("state file corrupted: {0}")]
    StateCorrupted(String),

    #[error("another invocation holds the backup directory lock")]
    LockBusy,

    #[error("operation cancelled")]
    Cancelled,

    #[error("confirmation denied")]
    ConfirmationDenied,

    #[error("post-restore verification failed: {0}")]
    VerifyFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            OrchestratorError::TargetNotFound(_) | OrchestratorError::TargetNotRunning(_) => 2,
            OrchestratorError::NameInvalid(_)
            | OrchestratorError::NameReserved(_)
            | OrchestratorError::NameCollision(_)
            | OrchestratorError::ValidationFailed(_) => 3,
            OrchestratorError::Cancelled | OrchestratorError::ConfirmationDenied => 4,
            OrchestratorError::LockBusy => 5,
            OrchestratorError::ExecTimeout(_) => 6,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

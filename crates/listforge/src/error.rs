use std::path::PathBuf;
use thiserror::Error;

use crate::batch::JobStatus;
use crate::checkpoint::StoreError;

#[derive(Error, Debug)]
pub enum ListforgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Report error: {0}")]
    Report(#[from] crate::report::ReportError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid service '{name}': {reason}")]
    InvalidService { name: String, reason: String },

    #[error("No database path configured and no home directory available")]
    NoDatabasePath,
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Submission contains no identifiers")]
    EmptySubmission,

    #[error("Job {job_id} is already {status} and cannot be run again")]
    AlreadyTerminal { job_id: String, status: JobStatus },

    #[error("Job {job_id} is still {status}; only terminal jobs can be resubmitted")]
    NotTerminal { job_id: String, status: JobStatus },

    #[error("Job {job_id} has no identifiers matching the resubmit scope")]
    NothingToResubmit { job_id: String },
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Job {job_id} is already {status}; refusing to resume")]
    AlreadyTerminal { job_id: String, status: JobStatus },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} run was interrupted: {reason}")]
    Interrupted { job_id: String, reason: String },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl RecoveryError {
    /// True when the refusal was the terminal-state gate rather than a fault.
    pub fn is_already_terminal(&self) -> bool {
        matches!(self, RecoveryError::AlreadyTerminal { .. })
    }
}

pub type Result<T> = std::result::Result<T, ListforgeError>;

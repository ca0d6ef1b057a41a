//! Durable job and item checkpoints.
//!
//! Every write that changes a running job is fenced: it carries the
//! [`Lease`] returned by [`CheckpointStore::acquire_lease`] and is rejected
//! with [`StoreError::FenceLost`] once another worker has taken the job over.

mod sqlite;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::batch::{ItemOutcome, ItemRecord, ItemStage, Job, JobCounts, JobStatus};
use crate::db::DatabaseError;

pub use sqlite::SqliteCheckpointStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Lease on job {job_id} was taken over by another worker")]
    FenceLost { job_id: String },

    #[error("Job {job_id} is leased by '{owner}' until {expires_at}")]
    LeaseHeld {
        job_id: String,
        owner: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Job {job_id} is already {status}")]
    JobTerminal { job_id: String, status: JobStatus },

    #[error("Corrupt checkpoint data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Errors that mean this worker no longer owns the job. The job must not
    /// be written to after one of these.
    pub fn is_ownership_loss(&self) -> bool {
        matches!(
            self,
            StoreError::FenceLost { .. } | StoreError::LeaseHeld { .. } | StoreError::JobTerminal { .. }
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(DatabaseError::Sqlite(e))
    }
}

/// Proof of ownership of one job for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: String,
    pub owner_id: String,
    /// Fencing token. Strictly greater than the token of any earlier lease.
    pub fence: i64,
    /// How far each fenced write pushes the expiry.
    pub ttl: Duration,
}

/// Filter for [`CheckpointStore::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Only pending and running jobs.
    pub active_only: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl JobFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }
}

/// Difference between stored counters and the counters recomputed from
/// item records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountDrift {
    pub stored: JobCounts,
    pub recomputed: JobCounts,
}

impl CountDrift {
    pub fn has_drift(&self) -> bool {
        self.stored != self.recomputed
    }
}

/// Durable storage for jobs and their items.
///
/// Implementations must make each method atomic and durable on return.
pub trait CheckpointStore: Send + Sync {
    /// Persists a new pending job.
    fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    fn load_job(&self, job_id: &str) -> Result<Job, StoreError>;

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Takes ownership of a non-terminal job. Succeeds when the job is
    /// unowned, already owned by `owner_id`, or its lease has expired.
    fn acquire_lease(
        &self,
        job_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<(Lease, Job), StoreError>;

    /// Moves a pending job to running. A running job stays running.
    fn mark_running(&self, lease: &Lease) -> Result<Job, StoreError>;

    fn load_item(&self, job_id: &str, identifier: &str) -> Result<Option<ItemRecord>, StoreError>;

    /// Saves an intermediate stage transition of one item.
    fn save_item(&self, lease: &Lease, item: &ItemRecord) -> Result<(), StoreError>;

    /// Saves a resolved item and, in the same transaction, advances the
    /// job cursor to the item's position and bumps the counters.
    fn commit_item(&self, lease: &Lease, item: &ItemRecord) -> Result<Job, StoreError>;

    /// Moves the job into a terminal status and releases the lease.
    fn finish_job(
        &self,
        lease: &Lease,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StoreError>;

    /// Raises the cancellation flag on a non-terminal job. Not fenced.
    fn request_cancel(&self, job_id: &str) -> Result<Job, StoreError>;

    fn list_items(&self, job_id: &str) -> Result<Vec<ItemRecord>, StoreError>;

    fn items_with_outcome(
        &self,
        job_id: &str,
        outcome: ItemOutcome,
    ) -> Result<Vec<ItemRecord>, StoreError>;

    /// Item count per stage. Stages without items are absent.
    fn stage_counts(&self, job_id: &str) -> Result<BTreeMap<ItemStage, u64>, StoreError>;

    /// Recomputes the counters from item records up to the cursor and
    /// stores them when they drifted.
    fn reconcile_counts(&self, lease: &Lease) -> Result<CountDrift, StoreError>;
}

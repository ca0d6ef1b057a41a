use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::batch::{ItemOutcome, ItemRecord, ItemStage, Job, JobStatus};
use crate::checkpoint::{CheckpointStore, JobFilter, Lease, SqliteCheckpointStore, StoreError};
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ListforgeError, OrchestratorError};
use crate::pipeline::{ItemPipeline, JobEvent, NoopProgress, PipelineConfig, ProgressReporter};
use crate::ratelimit::RateLimiters;

/// Options accepted by [`JobOrchestrator::submit`].
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    /// When false, items stop at `priced` and nothing is published.
    pub publish_enabled: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            publish_enabled: true,
        }
    }
}

impl SubmitOptions {
    pub fn dry_run() -> Self {
        Self {
            publish_enabled: false,
        }
    }
}

/// Which identifiers of a terminal job a resubmission carries over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResubmitScope {
    /// Items that resolved as failed.
    FailedItems,
    /// Every item that did not succeed, including ones never reached.
    Unfinished,
}

/// Answer to a status query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job: Job,
    pub stage_counts: BTreeMap<ItemStage, u64>,
}

/// Owns the job lifecycle: submission, the item loop, checkpoints and the
/// terminal transition.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn CheckpointStore>,
    pipeline: Arc<ItemPipeline>,
    owner_id: String,
    lease_ttl: Duration,
    pipeline_epoch: u32,
    progress: Arc<dyn ProgressReporter>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        pipeline: Arc<ItemPipeline>,
        owner_id: impl Into<String>,
        lease_ttl: Duration,
        pipeline_epoch: u32,
    ) -> Self {
        Self {
            store,
            pipeline,
            owner_id: owner_id.into(),
            lease_ttl,
            pipeline_epoch,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Builds the pipeline and rate limiters described by `config` on top of
    /// an existing store.
    pub fn with_store(
        config: &Config,
        store: Arc<dyn CheckpointStore>,
        collaborators: Collaborators,
    ) -> Self {
        let limiters = Arc::new(RateLimiters::from_config(config));
        let pipeline = ItemPipeline::new(
            store.clone(),
            collaborators,
            limiters,
            PipelineConfig::from_config(config),
        );
        Self::new(
            store,
            Arc::new(pipeline),
            config.resolve_worker_id(),
            config.lease_ttl(),
            config.pipeline_epoch,
        )
    }

    /// Opens the configured SQLite database and builds an orchestrator on it.
    pub fn from_config(
        config: &Config,
        collaborators: Collaborators,
    ) -> Result<Self, ListforgeError> {
        let path = config.database_path()?;
        let db = Database::open(&path)?;
        let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(db));
        Ok(Self::with_store(config, store, collaborators))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Creates and persists a pending job.
    ///
    /// Identifiers are trimmed, blanks dropped and duplicates collapsed to
    /// their first occurrence.
    pub fn submit<I, S>(&self, items: I, options: SubmitOptions) -> Result<String, OrchestratorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let identifiers: Vec<String> = items
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .filter(|s| seen.insert(s.clone()))
            .collect();

        if identifiers.is_empty() {
            return Err(OrchestratorError::EmptySubmission);
        }

        let job = Job::new(identifiers, options.publish_enabled, self.pipeline_epoch);
        self.store.create_job(&job)?;
        info!(
            job_id = %job.job_id,
            total = job.counts.total,
            publish = job.publish_enabled,
            "Job submitted"
        );
        Ok(job.job_id)
    }

    /// Runs a job from its resume point until it is terminal.
    ///
    /// Calling this on a running job resumes it. Terminal jobs are refused
    /// without any write.
    pub async fn run(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let job = self.store.load_job(job_id)?;
        if job.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal {
                job_id: job.job_id,
                status: job.status,
            });
        }

        let (lease, _) = self
            .store
            .acquire_lease(job_id, &self.owner_id, self.lease_ttl)
            .map_err(|e| match e {
                StoreError::JobTerminal { job_id, status } => {
                    OrchestratorError::AlreadyTerminal { job_id, status }
                }
                other => OrchestratorError::Store(other),
            })?;

        let span = info_span!("job", job_id = %job_id, fence = lease.fence);
        self.drive(lease).instrument(span).await
    }

    async fn drive(&self, lease: Lease) -> Result<Job, OrchestratorError> {
        match self.process_items(&lease).await {
            Ok(job) => Ok(job),
            Err(e) if e.is_ownership_loss() => {
                warn!(error = %e, "Lost ownership of job, stopping without further writes");
                Err(e.into())
            }
            Err(e) => {
                error!(error = %e, "Job aborted by fatal error");
                match self.finish(&lease, JobStatus::Failed, Some(&e.to_string())) {
                    Ok(job) => Ok(job),
                    Err(finish_err) => {
                        error!(error = %finish_err, "Could not record job failure");
                        Err(e.into())
                    }
                }
            }
        }
    }

    async fn process_items(&self, lease: &Lease) -> Result<Job, StoreError> {
        let mut job = self.store.mark_running(lease)?;

        let drift = self.store.reconcile_counts(lease)?;
        if drift.has_drift() {
            job = self.store.load_job(&lease.job_id)?;
        }

        let start = job.resume_index();
        info!(resume_index = start, total = job.counts.total, "Job running");
        self.progress.report(JobEvent::JobStarted {
            job_id: job.job_id.clone(),
            resume_index: start,
            total: job.counts.total,
            timestamp: Utc::now(),
        });

        let items: Vec<(usize, String)> = job
            .remaining()
            .map(|(i, s)| (i, s.to_string()))
            .collect();

        for (index, identifier) in items {
            if self.store.load_job(&job.job_id)?.cancel_requested {
                info!(next_index = index, "Cancellation requested, stopping");
                return self.finish(lease, JobStatus::Cancelled, None);
            }

            self.progress.report(JobEvent::ItemStarted {
                job_id: job.job_id.clone(),
                identifier: identifier.clone(),
                index,
            });

            let item = self.pipeline.process(lease, &job, index, &identifier).await?;
            job = self.store.commit_item(lease, &item)?;

            debug!(
                index,
                %identifier,
                stage = %item.stage,
                processed = job.counts.processed,
                "Item committed"
            );
            if let Some(outcome) = item.outcome {
                self.progress.report(JobEvent::ItemFinished {
                    job_id: job.job_id.clone(),
                    identifier,
                    index,
                    stage: item.stage,
                    outcome,
                });
            }
        }

        self.finish(lease, JobStatus::Completed, None)
    }

    fn finish(
        &self,
        lease: &Lease,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StoreError> {
        let job = self.store.finish_job(lease, status, error)?;
        info!(
            status = %job.status,
            succeeded = job.counts.succeeded,
            failed = job.counts.failed,
            "Job finished"
        );
        self.progress.report(JobEvent::JobFinished {
            job_id: job.job_id.clone(),
            status: job.status,
            counts: job.counts,
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    /// Job record plus per-stage item counts.
    pub fn status(&self, job_id: &str) -> Result<JobStatusReport, OrchestratorError> {
        let job = self.store.load_job(job_id)?;
        let stage_counts = self.store.stage_counts(job_id)?;
        Ok(JobStatusReport { job, stage_counts })
    }

    /// Flags a job for cooperative cancellation. The running owner stops
    /// before its next item.
    pub fn request_cancel(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let job = self.store.request_cancel(job_id).map_err(|e| match e {
            StoreError::JobTerminal { job_id, status } => {
                OrchestratorError::AlreadyTerminal { job_id, status }
            }
            other => OrchestratorError::Store(other),
        })?;
        info!(job_id = %job.job_id, status = %job.status, "Cancellation requested");
        Ok(job)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.store.list_jobs(filter)?)
    }

    pub fn failed_items(&self, job_id: &str) -> Result<Vec<ItemRecord>, OrchestratorError> {
        self.store.load_job(job_id)?;
        Ok(self.store.items_with_outcome(job_id, ItemOutcome::Failed)?)
    }

    /// Submits a new job for part of a terminal job's identifiers.
    ///
    /// The new job shares the parent's lineage, so items published before
    /// carry the same idempotency key and are not published twice.
    pub fn resubmit(&self, job_id: &str, scope: ResubmitScope) -> Result<String, OrchestratorError> {
        let parent = self.store.load_job(job_id)?;
        if !parent.is_terminal() {
            return Err(OrchestratorError::NotTerminal {
                job_id: parent.job_id,
                status: parent.status,
            });
        }

        let identifiers: Vec<String> = match scope {
            ResubmitScope::FailedItems => self
                .store
                .items_with_outcome(job_id, ItemOutcome::Failed)?
                .into_iter()
                .map(|item| item.identifier)
                .collect(),
            ResubmitScope::Unfinished => {
                let succeeded: HashSet<String> = self
                    .store
                    .items_with_outcome(job_id, ItemOutcome::Succeeded)?
                    .into_iter()
                    .map(|item| item.identifier)
                    .collect();
                parent
                    .input_items
                    .iter()
                    .filter(|id| !succeeded.contains(*id))
                    .cloned()
                    .collect()
            }
        };

        if identifiers.is_empty() {
            return Err(OrchestratorError::NothingToResubmit {
                job_id: parent.job_id,
            });
        }

        let job = Job::resubmission_of(&parent, identifiers);
        self.store.create_job(&job)?;
        info!(
            job_id = %job.job_id,
            parent = %parent.job_id,
            lineage = %job.lineage_id,
            total = job.counts.total,
            "Job resubmitted"
        );
        Ok(job.job_id)
    }
}

use tracing::{info, warn};

use crate::batch::Job;
use crate::checkpoint::{JobFilter, StoreError};
use crate::error::{OrchestratorError, RecoveryError};

use super::pool::{JobPool, JobRecovery};
use super::runner::JobOrchestrator;

/// The only entry point that resumes persisted jobs.
///
/// Terminal jobs are refused with [`RecoveryError::AlreadyTerminal`] and left
/// untouched. Non-terminal jobs are resumed however old their last update
/// is; ownership is settled by the lease, not by timestamps.
#[derive(Clone)]
pub struct RecoveryController {
    orchestrator: JobOrchestrator,
    max_concurrent_jobs: usize,
}

impl RecoveryController {
    pub fn new(orchestrator: JobOrchestrator, max_concurrent_jobs: usize) -> Self {
        Self {
            orchestrator,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
        }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub async fn recover(&self, job_id: &str) -> Result<Job, RecoveryError> {
        let job = match self.orchestrator.store().load_job(job_id) {
            Ok(job) => job,
            Err(StoreError::JobNotFound(id)) => return Err(RecoveryError::NotFound(id)),
            Err(e) => return Err(OrchestratorError::Store(e).into()),
        };

        if job.is_terminal() {
            info!(job_id, status = %job.status, "Refusing to resume terminal job");
            return Err(RecoveryError::AlreadyTerminal {
                job_id: job.job_id,
                status: job.status,
            });
        }

        info!(
            job_id,
            status = %job.status,
            resume_index = job.resume_index(),
            "Recovering job"
        );
        self.orchestrator.run(job_id).await.map_err(|e| match e {
            OrchestratorError::AlreadyTerminal { job_id, status } => {
                RecoveryError::AlreadyTerminal { job_id, status }
            }
            OrchestratorError::Store(StoreError::JobNotFound(id)) => RecoveryError::NotFound(id),
            other => RecoveryError::Orchestrator(other),
        })
    }

    /// Resumes every pending or running job, at most `max_concurrent_jobs`
    /// at a time. Outcomes are returned in the order the jobs were listed.
    pub async fn recover_all(&self) -> Result<Vec<JobRecovery>, RecoveryError> {
        let jobs = self
            .orchestrator
            .store()
            .list_jobs(&JobFilter::active())
            .map_err(OrchestratorError::Store)?;

        if jobs.is_empty() {
            info!("No unfinished jobs to recover");
            return Ok(Vec::new());
        }

        info!(count = jobs.len(), "Recovering unfinished jobs");
        let pool = JobPool::new(self.clone(), self.max_concurrent_jobs);
        let outcomes = pool
            .run_all(jobs.into_iter().map(|job| job.job_id).collect())
            .await;

        for outcome in &outcomes {
            if let Err(ref e) = outcome.result {
                warn!(job_id = %outcome.job_id, error = %e, "Job recovery did not finish");
            }
        }
        Ok(outcomes)
    }
}

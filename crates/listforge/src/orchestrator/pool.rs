use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::batch::Job;
use crate::error::RecoveryError;

use super::recovery::RecoveryController;

/// Result of recovering one job through a [`JobPool`].
#[derive(Debug)]
pub struct JobRecovery {
    pub job_id: String,
    pub result: Result<Job, RecoveryError>,
}

/// Runs jobs concurrently, at most `max_concurrent` at a time.
///
/// Items inside one job stay sequential; only whole jobs run side by side.
pub struct JobPool {
    controller: RecoveryController,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl JobPool {
    /// # Panics
    /// Panics if `max_concurrent` is 0.
    pub fn new(controller: RecoveryController, max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be > 0");
        Self {
            controller,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Recovers each job and waits for all of them. A job whose task panics
    /// is reported as [`RecoveryError::Interrupted`]; the others are not
    /// affected.
    pub async fn run_all(&self, job_ids: Vec<String>) -> Vec<JobRecovery> {
        let mut tasks = JoinSet::new();

        for (slot, job_id) in job_ids.iter().enumerate() {
            let controller = self.controller.clone();
            let permits = Arc::clone(&self.permits);
            let job_id = job_id.clone();

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            slot,
                            Err(RecoveryError::Interrupted {
                                job_id,
                                reason: "job pool closed".to_string(),
                            }),
                        )
                    }
                };
                debug!(%job_id, "Job slot acquired");

                let run_id = job_id.clone();
                let handle = tokio::spawn(async move { controller.recover(&run_id).await });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(interrupted(&job_id, e)),
                };
                (slot, result)
            });
        }

        let mut results: Vec<Option<Result<Job, RecoveryError>>> =
            job_ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(e) => error!("Job pool task failed: {}", e),
            }
        }

        let recovered = job_ids
            .into_iter()
            .zip(results)
            .map(|(job_id, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(RecoveryError::Interrupted {
                        job_id: job_id.clone(),
                        reason: "job pool task lost".to_string(),
                    })
                });
                JobRecovery { job_id, result }
            })
            .collect::<Vec<_>>();

        info!(
            jobs = recovered.len(),
            finished = recovered.iter().filter(|r| r.result.is_ok()).count(),
            "Job pool drained"
        );
        recovered
    }
}

fn interrupted(job_id: &str, e: JoinError) -> RecoveryError {
    let reason = if e.is_panic() {
        let payload = e.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .map(|msg| format!("panicked: {}", msg))
            .unwrap_or_else(|| "panicked".to_string())
    } else {
        "task cancelled".to_string()
    };
    error!(job_id, %reason, "Job run interrupted");
    RecoveryError::Interrupted {
        job_id: job_id.to_string(),
        reason,
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
///
/// Transitions only move forward: `Pending -> Running -> {Completed, Failed, Cancelled}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal jobs are immutable and never resumed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` respects the one-directional lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Running) => true,
            (JobStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Denormalized progress counters. Recomputed from item records on recovery.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// A batch submission of identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier (UUID).
    pub job_id: String,
    /// Job this one was resubmitted from, or its own id. Feeds idempotency keys.
    pub lineage_id: String,
    pub status: JobStatus,
    /// Identifiers in submission order; the order defines the resume cursor.
    pub input_items: Vec<String>,
    /// When false the publish stage is skipped and items stop at `priced`.
    pub publish_enabled: bool,
    pub pipeline_epoch: u32,
    /// Highest input position fully resolved, `-1` before any item.
    pub last_processed_index: i64,
    pub counts: JobCounts,
    /// Job-level fatal error. Per-item failures never land here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub fence: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a pending job. Nothing is persisted until the store accepts it.
    pub fn new(input_items: Vec<String>, publish_enabled: bool, pipeline_epoch: u32) -> Self {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        Self {
            lineage_id: job_id.clone(),
            job_id,
            status: JobStatus::Pending,
            counts: JobCounts {
                total: input_items.len() as u64,
                ..JobCounts::default()
            },
            input_items,
            publish_enabled,
            pipeline_epoch,
            last_processed_index: -1,
            error: None,
            cancel_requested: false,
            owner_id: None,
            lease_expires_at: None,
            fence: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Creates a pending job that inherits the lineage of `parent`.
    pub fn resubmission_of(parent: &Job, input_items: Vec<String>) -> Self {
        let mut job = Self::new(input_items, parent.publish_enabled, parent.pipeline_epoch);
        job.lineage_id = parent.lineage_id.clone();
        job
    }

    /// Position the next run starts from.
    pub fn resume_index(&self) -> usize {
        (self.last_processed_index + 1).max(0) as usize
    }

    /// Identifiers not yet resolved, with their positions.
    pub fn remaining(&self) -> impl Iterator<Item = (usize, &str)> {
        self.input_items
            .iter()
            .enumerate()
            .skip(self.resume_index())
            .map(|(i, s)| (i, s.as_str()))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_job_is_pending_with_cursor_before_start() {
        let job = Job::new(items(&["A", "B", "C"]), true, 1);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.last_processed_index, -1);
        assert_eq!(job.counts.total, 3);
        assert_eq!(job.lineage_id, job.job_id);
        assert!(job.completed_at.is_none());
        assert_eq!(job.resume_index(), 0);
    }

    #[test]
    fn test_remaining_skips_resolved_positions() {
        let mut job = Job::new(items(&["A", "B", "C"]), true, 1);
        job.last_processed_index = 0;
        let rest: Vec<(usize, &str)> = job.remaining().collect();
        assert_eq!(rest, vec![(1, "B"), (2, "C")]);
    }

    #[test]
    fn test_resubmission_keeps_lineage() {
        let parent = Job::new(items(&["A", "B"]), false, 4);
        let child = Job::resubmission_of(&parent, items(&["B"]));
        assert_ne!(child.job_id, parent.job_id);
        assert_eq!(child.lineage_id, parent.lineage_id);
        assert!(!child.publish_enabled);
        assert_eq!(child.pipeline_epoch, 4);
    }

    #[test]
    fn test_status_transitions_are_one_directional() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Running));
            assert!(!terminal.can_transition_to(Pending));
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }
}

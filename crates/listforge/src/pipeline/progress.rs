use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::batch::{ItemOutcome, ItemStage, JobCounts, JobStatus};

/// Events emitted while a job runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    #[serde(rename_all = "camelCase")]
    JobStarted {
        job_id: String,
        resume_index: usize,
        total: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ItemStarted {
        job_id: String,
        identifier: String,
        index: usize,
    },
    #[serde(rename_all = "camelCase")]
    ItemFinished {
        job_id: String,
        identifier: String,
        index: usize,
        stage: ItemStage,
        outcome: ItemOutcome,
    },
    #[serde(rename_all = "camelCase")]
    JobFinished {
        job_id: String,
        status: JobStatus,
        counts: JobCounts,
        timestamp: DateTime<Utc>,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: JobEvent);
}

/// No-op reporter for unit tests and headless runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: JobEvent) {}
}

/// Fans events out to any number of subscribers.
///
/// Sending with no subscribers is not an error; the event is dropped.
#[derive(Clone)]
pub struct BroadcastProgress {
    sender: broadcast::Sender<JobEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_delivers_to_subscribers() {
        let progress = BroadcastProgress::new(8);
        let mut rx = progress.subscribe();
        progress.report(JobEvent::ItemStarted {
            job_id: "j".to_string(),
            identifier: "A".to_string(),
            index: 0,
        });
        match rx.try_recv().unwrap() {
            JobEvent::ItemStarted { identifier, .. } => assert_eq!(identifier, "A"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        BroadcastProgress::new(1).report(JobEvent::ItemStarted {
            job_id: "j".to_string(),
            identifier: "A".to_string(),
            index: 0,
        });
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(JobEvent::ItemFinished {
            job_id: "j".to_string(),
            identifier: "A".to_string(),
            index: 2,
            stage: ItemStage::Priced,
            outcome: ItemOutcome::Succeeded,
        })
        .unwrap();
        assert_eq!(json["type"], "itemFinished");
        assert_eq!(json["jobId"], "j");
        assert_eq!(json["stage"], "priced");
    }
}

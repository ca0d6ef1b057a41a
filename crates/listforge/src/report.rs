//! Exportable job summaries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::batch::{ItemOutcome, ItemStage, Job, JobCounts, JobStatus};
use crate::checkpoint::{CheckpointStore, StoreError};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write report '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub position: usize,
    pub identifier: String,
    pub stage: ItemStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ItemOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

/// Point-in-time view of a job and all of its items.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub lineage_id: String,
    pub status: JobStatus,
    pub publish_enabled: bool,
    pub counts: JobCounts,
    /// Succeeded share of processed items, 0.0 when nothing was processed.
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub stage_counts: BTreeMap<ItemStage, u64>,
    pub items: Vec<ItemSummary>,
    pub generated_at: DateTime<Utc>,
}

impl JobSummary {
    pub fn build(store: &dyn CheckpointStore, job_id: &str) -> Result<Self, ReportError> {
        let job = store.load_job(job_id)?;
        let items = store
            .list_items(job_id)?
            .into_iter()
            .map(|item| ItemSummary {
                position: item.position,
                title: item.metadata.map(|m| m.title),
                price: item.price.map(|p| p.to_string()),
                listing_reference: item.listing_reference.map(|r| r.0),
                error: if item.outcome == Some(ItemOutcome::Failed) {
                    item.error_detail
                } else {
                    None
                },
                identifier: item.identifier,
                stage: item.stage,
                outcome: item.outcome,
                attempts: item.attempts,
            })
            .collect();
        let stage_counts = store.stage_counts(job_id)?;
        Ok(Self::assemble(job, stage_counts, items))
    }

    fn assemble(
        job: Job,
        stage_counts: BTreeMap<ItemStage, u64>,
        items: Vec<ItemSummary>,
    ) -> Self {
        let success_rate = if job.counts.processed == 0 {
            0.0
        } else {
            job.counts.succeeded as f64 / job.counts.processed as f64
        };
        Self {
            job_id: job.job_id,
            lineage_id: job.lineage_id,
            status: job.status,
            publish_enabled: job.publish_enabled,
            counts: job.counts,
            success_rate,
            error: job.error,
            created_at: job.created_at,
            completed_at: job.completed_at,
            stage_counts,
            items,
            generated_at: Utc::now(),
        }
    }

    /// Writes the summary as pretty-printed JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        let io_err = |source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, json).map_err(io_err)?;
        tracing::info!(job_id = %self.job_id, path = %path.display(), "Wrote job summary");
        Ok(())
    }
}

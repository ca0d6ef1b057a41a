//! Domain model for batch jobs and their per-item records.

pub mod item;
pub mod job;

pub use item::{ItemOutcome, ItemRecord, ItemStage};
pub use job::{Job, JobCounts, JobStatus};

/// Formats a UTC timestamp the way it is persisted.
pub(crate) fn format_timestamp(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339()
}

//! SQLite-backed checkpoint store.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CheckpointStore, CountDrift, JobFilter, Lease, StoreError};
use crate::batch::{
    format_timestamp, ItemOutcome, ItemRecord, ItemStage, Job, JobCounts, JobStatus,
};
use crate::collaborators::ListingReference;
use crate::db::item_repo::{self, ItemRow};
use crate::db::job_repo::{self, JobRow, JobRowFilter};
use crate::db::Database;
use crate::pipeline::IdempotencyKey;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn parse_status(s: &str, job_id: &str) -> Result<JobStatus, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Corrupt(format!("job {}: {}", job_id, e)))
}

fn parse_stage(s: &str, identifier: &str) -> Result<ItemStage, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Corrupt(format!("item {}: {}", identifier, e)))
}

fn to_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>, StoreError> {
    value
        .map(|v| serde_json::to_string(v).map_err(|e| StoreError::Corrupt(e.to_string())))
        .transpose()
}

fn from_json<T: DeserializeOwned>(raw: Option<&str>, what: &str) -> Result<Option<T>, StoreError> {
    raw.map(|s| {
        serde_json::from_str(s).map_err(|e| StoreError::Corrupt(format!("{}: {}", what, e)))
    })
    .transpose()
}

fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.checked_add_signed(chrono::Duration::milliseconds(millis))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn job_from_row(row: &JobRow) -> Result<Job, StoreError> {
    let input_items: Vec<String> = serde_json::from_str(&row.input_items)
        .map_err(|e| StoreError::Corrupt(format!("job {} input items: {}", row.id, e)))?;

    Ok(Job {
        job_id: row.id.clone(),
        lineage_id: row.lineage_id.clone(),
        status: parse_status(&row.status, &row.id)?,
        input_items,
        publish_enabled: row.publish_enabled,
        pipeline_epoch: row.pipeline_epoch,
        last_processed_index: row.last_processed_index,
        counts: JobCounts {
            total: row.total_count,
            processed: row.processed_count,
            succeeded: row.succeeded_count,
            failed: row.failed_count,
        },
        error: row.error.clone(),
        cancel_requested: row.cancel_requested,
        owner_id: row.owner_id.clone(),
        lease_expires_at: row.lease_expires_at.as_deref().map(parse_timestamp),
        fence: row.fence,
        created_at: parse_timestamp(&row.created_at),
        started_at: row.started_at.as_deref().map(parse_timestamp),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
        updated_at: parse_timestamp(&row.updated_at),
    })
}

fn job_to_row(job: &Job) -> Result<JobRow, StoreError> {
    let input_items =
        serde_json::to_string(&job.input_items).map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(JobRow {
        id: job.job_id.clone(),
        lineage_id: job.lineage_id.clone(),
        status: job.status.as_str().to_string(),
        input_items,
        publish_enabled: job.publish_enabled,
        pipeline_epoch: job.pipeline_epoch,
        last_processed_index: job.last_processed_index,
        total_count: job.counts.total,
        processed_count: job.counts.processed,
        succeeded_count: job.counts.succeeded,
        failed_count: job.counts.failed,
        error: job.error.clone(),
        cancel_requested: job.cancel_requested,
        owner_id: job.owner_id.clone(),
        lease_expires_at: job.lease_expires_at.map(format_timestamp),
        fence: job.fence,
        created_at: format_timestamp(job.created_at),
        started_at: job.started_at.map(format_timestamp),
        completed_at: job.completed_at.map(format_timestamp),
        updated_at: format_timestamp(job.updated_at),
    })
}

fn item_from_row(row: &ItemRow) -> Result<ItemRecord, StoreError> {
    let outcome = row
        .outcome
        .as_deref()
        .map(|s| {
            s.parse::<ItemOutcome>()
                .map_err(|e| StoreError::Corrupt(format!("item {}: {}", row.identifier, e)))
        })
        .transpose()?;

    Ok(ItemRecord {
        job_id: row.job_id.clone(),
        identifier: row.identifier.clone(),
        position: usize::try_from(row.position)
            .map_err(|_| StoreError::Corrupt(format!("item {}: negative position", row.identifier)))?,
        stage: parse_stage(&row.stage, &row.identifier)?,
        outcome,
        metadata: from_json(row.metadata.as_deref(), "metadata")?,
        images: from_json(row.images.as_deref(), "images")?,
        price: from_json(row.price.as_deref(), "price")?,
        idempotency_key: row.idempotency_key.clone().map(IdempotencyKey::from_stored),
        listing_reference: row.listing_reference.clone().map(ListingReference::new),
        error_detail: row.error_detail.clone(),
        attempts: row.attempts,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    })
}

fn item_to_row(item: &ItemRecord) -> Result<ItemRow, StoreError> {
    Ok(ItemRow {
        job_id: item.job_id.clone(),
        identifier: item.identifier.clone(),
        position: item.position as i64,
        stage: item.stage.as_str().to_string(),
        outcome: item.outcome.map(|o| o.as_str().to_string()),
        metadata: to_json(item.metadata.as_ref())?,
        images: to_json(item.images.as_ref())?,
        price: to_json(item.price.as_ref())?,
        idempotency_key: item.idempotency_key.as_ref().map(|k| k.as_str().to_string()),
        listing_reference: item
            .listing_reference
            .as_ref()
            .map(|r| r.as_str().to_string()),
        error_detail: item.error_detail.clone(),
        attempts: item.attempts,
        created_at: format_timestamp(item.created_at),
        updated_at: format_timestamp(item.updated_at),
    })
}

/// Loads the job row and verifies `lease` still owns it.
fn check_fence(conn: &Connection, lease: &Lease) -> Result<JobRow, StoreError> {
    let row = job_repo::find_by_id(conn, &lease.job_id)?
        .ok_or_else(|| StoreError::JobNotFound(lease.job_id.clone()))?;

    if row.fence != lease.fence || row.owner_id.as_deref() != Some(lease.owner_id.as_str()) {
        return Err(StoreError::FenceLost {
            job_id: lease.job_id.clone(),
        });
    }

    let status = parse_status(&row.status, &row.id)?;
    if status.is_terminal() {
        return Err(StoreError::JobTerminal {
            job_id: row.id,
            status,
        });
    }
    Ok(row)
}

fn ensure_transition(job: &Job, next: JobStatus) -> Result<(), StoreError> {
    if job.status.can_transition_to(next) {
        return Ok(());
    }
    Err(StoreError::Corrupt(format!(
        "job {} cannot move from {} to {}",
        job.job_id, job.status, next
    )))
}

fn renew(conn: &Connection, lease: &Lease, now: DateTime<Utc>) -> Result<(), StoreError> {
    let expires = format_timestamp(lease_expiry(now, lease.ttl));
    job_repo::update_lease(
        conn,
        &lease.job_id,
        Some(&lease.owner_id),
        Some(&expires),
        lease.fence,
    )?;
    Ok(())
}

/// Rejects writes that would move an item backwards or drop its publish witness.
fn ensure_forward(existing: &ItemRow, next: &ItemRecord) -> Result<(), StoreError> {
    let current = parse_stage(&existing.stage, &existing.identifier)?;
    if next.stage < current && next.stage != ItemStage::Failed {
        return Err(StoreError::Corrupt(format!(
            "item {} would move from {} back to {}",
            next.identifier, current, next.stage
        )));
    }
    if let Some(ref witness) = existing.listing_reference {
        let same = next
            .listing_reference
            .as_ref()
            .is_some_and(|r| r.as_str() == witness);
        if !same {
            return Err(StoreError::Corrupt(format!(
                "item {} would lose listing reference {}",
                next.identifier, witness
            )));
        }
    }
    Ok(())
}

fn write_item(conn: &Connection, lease: &Lease, item: &ItemRecord) -> Result<(), StoreError> {
    if item.job_id != lease.job_id {
        return Err(StoreError::Corrupt(format!(
            "item {} belongs to job {}, not {}",
            item.identifier, item.job_id, lease.job_id
        )));
    }
    if let Some(existing) = item_repo::find(conn, &item.job_id, &item.identifier)? {
        ensure_forward(&existing, item)?;
    }
    item_repo::upsert(conn, &item_to_row(item)?)?;
    Ok(())
}

fn reload(conn: &Connection, job_id: &str) -> Result<Job, StoreError> {
    let row = job_repo::find_by_id(conn, job_id)?
        .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
    job_from_row(&row)
}

// ─── SqliteCheckpointStore ──────────────────────────────────────────────────

/// [`CheckpointStore`] over a [`Database`].
///
/// Each operation runs in one immediate transaction, so a crash leaves
/// either the whole write or none of it.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let row = job_to_row(job)?;
        self.db.with_conn(|conn| {
            job_repo::insert(conn, &row)?;
            Ok::<_, StoreError>(())
        })?;
        log::debug!("Created job {} with {} items", job.job_id, job.counts.total);
        Ok(())
    }

    fn load_job(&self, job_id: &str) -> Result<Job, StoreError> {
        self.db.with_conn(|conn| reload(conn, job_id))
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let row_filter = JobRowFilter {
            status: filter.status.map(|s| s.as_str().to_string()),
            exclude_statuses: if filter.active_only {
                [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled]
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect()
            } else {
                Vec::new()
            },
            limit: filter.limit,
            offset: filter.offset,
        };
        let rows = self
            .db
            .with_conn(|conn| job_repo::query(conn, &row_filter))?;
        rows.iter().map(job_from_row).collect()
    }

    fn acquire_lease(
        &self,
        job_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<(Lease, Job), StoreError> {
        self.db.transaction(|tx| {
            let row = job_repo::find_by_id(tx, job_id)?
                .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;

            let status = parse_status(&row.status, &row.id)?;
            if status.is_terminal() {
                return Err(StoreError::JobTerminal {
                    job_id: row.id,
                    status,
                });
            }

            let now = Utc::now();
            if let (Some(owner), Some(expires)) = (&row.owner_id, &row.lease_expires_at) {
                let expires_at = parse_timestamp(expires);
                if owner != owner_id && expires_at > now {
                    return Err(StoreError::LeaseHeld {
                        job_id: row.id,
                        owner: owner.clone(),
                        expires_at,
                    });
                }
                if owner != owner_id {
                    log::warn!(
                        "Taking over job {} from '{}' (lease expired at {})",
                        row.id,
                        owner,
                        expires
                    );
                }
            }

            let lease = Lease {
                job_id: row.id.clone(),
                owner_id: owner_id.to_string(),
                fence: row.fence + 1,
                ttl,
            };
            renew(tx, &lease, now)?;
            let job = reload(tx, job_id)?;
            Ok((lease, job))
        })
    }

    fn mark_running(&self, lease: &Lease) -> Result<Job, StoreError> {
        self.db.transaction(|tx| {
            let row = check_fence(tx, lease)?;
            let mut job = job_from_row(&row)?;
            ensure_transition(&job, JobStatus::Running)?;
            let now = Utc::now();

            job.status = JobStatus::Running;
            job.started_at.get_or_insert(now);
            job.updated_at = now;

            job_repo::update_progress(tx, &job_to_row(&job)?)?;
            renew(tx, lease, now)?;
            reload(tx, &lease.job_id)
        })
    }

    fn load_item(&self, job_id: &str, identifier: &str) -> Result<Option<ItemRecord>, StoreError> {
        let row = self
            .db
            .with_conn(|conn| item_repo::find(conn, job_id, identifier))?;
        row.as_ref().map(item_from_row).transpose()
    }

    fn save_item(&self, lease: &Lease, item: &ItemRecord) -> Result<(), StoreError> {
        self.db.transaction(|tx| {
            check_fence(tx, lease)?;
            write_item(tx, lease, item)?;
            renew(tx, lease, Utc::now())
        })
    }

    fn commit_item(&self, lease: &Lease, item: &ItemRecord) -> Result<Job, StoreError> {
        let outcome = item.outcome.ok_or_else(|| {
            StoreError::Corrupt(format!("item {} committed without outcome", item.identifier))
        })?;

        self.db.transaction(|tx| {
            let row = check_fence(tx, lease)?;
            let mut job = job_from_row(&row)?;
            write_item(tx, lease, item)?;

            let index = item.position as i64;
            if index > job.last_processed_index {
                job.last_processed_index = index;
                job.counts.processed += 1;
                match outcome {
                    ItemOutcome::Succeeded => job.counts.succeeded += 1,
                    ItemOutcome::Failed => job.counts.failed += 1,
                }
            }
            let now = Utc::now();
            job.updated_at = now;

            job_repo::update_progress(tx, &job_to_row(&job)?)?;
            renew(tx, lease, now)?;
            reload(tx, &lease.job_id)
        })
    }

    fn finish_job(
        &self,
        lease: &Lease,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Corrupt(format!(
                "finish_job called with non-terminal status {}",
                status
            )));
        }

        self.db.transaction(|tx| {
            let row = check_fence(tx, lease)?;
            let mut job = job_from_row(&row)?;
            ensure_transition(&job, status)?;
            let now = Utc::now();

            job.status = status;
            job.error = error.map(str::to_string);
            job.completed_at.get_or_insert(now);
            job.updated_at = now;

            job_repo::update_progress(tx, &job_to_row(&job)?)?;
            job_repo::update_lease(tx, &lease.job_id, None, None, lease.fence)?;
            reload(tx, &lease.job_id)
        })
    }

    fn request_cancel(&self, job_id: &str) -> Result<Job, StoreError> {
        self.db.transaction(|tx| {
            let job = reload(tx, job_id)?;
            if job.is_terminal() {
                return Err(StoreError::JobTerminal {
                    job_id: job.job_id,
                    status: job.status,
                });
            }
            job_repo::set_cancel_requested(tx, job_id, &format_timestamp(Utc::now()))?;
            reload(tx, job_id)
        })
    }

    fn list_items(&self, job_id: &str) -> Result<Vec<ItemRecord>, StoreError> {
        let rows = self
            .db
            .with_conn(|conn| item_repo::list_by_job(conn, job_id))?;
        rows.iter().map(item_from_row).collect()
    }

    fn items_with_outcome(
        &self,
        job_id: &str,
        outcome: ItemOutcome,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        let rows = self
            .db
            .with_conn(|conn| item_repo::list_by_outcome(conn, job_id, outcome.as_str()))?;
        rows.iter().map(item_from_row).collect()
    }

    fn stage_counts(&self, job_id: &str) -> Result<BTreeMap<ItemStage, u64>, StoreError> {
        let rows = self
            .db
            .with_conn(|conn| item_repo::count_by_stage(conn, job_id))?;
        rows.into_iter()
            .map(|(stage, count)| Ok((parse_stage(&stage, job_id)?, count)))
            .collect()
    }

    fn reconcile_counts(&self, lease: &Lease) -> Result<CountDrift, StoreError> {
        self.db.transaction(|tx| {
            let row = check_fence(tx, lease)?;
            let mut job = job_from_row(&row)?;

            let mut recomputed = JobCounts {
                total: job.input_items.len() as u64,
                ..JobCounts::default()
            };
            for (outcome, count) in
                item_repo::count_resolved_by_outcome(tx, &job.job_id, job.last_processed_index)?
            {
                match outcome.parse::<ItemOutcome>() {
                    Ok(ItemOutcome::Succeeded) => recomputed.succeeded += count,
                    Ok(ItemOutcome::Failed) => recomputed.failed += count,
                    Err(e) => return Err(StoreError::Corrupt(e)),
                }
            }
            recomputed.processed = recomputed.succeeded + recomputed.failed;

            let drift = CountDrift {
                stored: job.counts,
                recomputed,
            };
            if drift.has_drift() {
                log::warn!(
                    "Job {} counters drifted: stored {:?}, recomputed {:?}",
                    job.job_id,
                    drift.stored,
                    drift.recomputed
                );
                job.counts = recomputed;
                job.updated_at = Utc::now();
                job_repo::update_progress(tx, &job_to_row(&job)?)?;
            }
            Ok(drift)
        })
    }
}

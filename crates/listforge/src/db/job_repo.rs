//! Job repository — row-level operations for the `jobs` table.
//!
//! Functions take a `&Connection` so callers can compose several of them
//! inside one [`Database::transaction`](super::Database::transaction).

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub lineage_id: String,
    pub status: String,
    /// JSON array of identifiers, in submission order.
    pub input_items: String,
    pub publish_enabled: bool,
    pub pipeline_epoch: u32,
    pub last_processed_index: i64,
    pub total_count: u64,
    pub processed_count: u64,
    pub succeeded_count: u64,
    pub failed_count: u64,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub owner_id: Option<String>,
    pub lease_expires_at: Option<String>,
    pub fence: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            lineage_id: row.get("lineage_id")?,
            status: row.get("status")?,
            input_items: row.get("input_items")?,
            publish_enabled: row.get("publish_enabled")?,
            pipeline_epoch: row.get("pipeline_epoch")?,
            last_processed_index: row.get("last_processed_index")?,
            total_count: row.get("total_count")?,
            processed_count: row.get("processed_count")?,
            succeeded_count: row.get("succeeded_count")?,
            failed_count: row.get("failed_count")?,
            error: row.get("error")?,
            cancel_requested: row.get("cancel_requested")?,
            owner_id: row.get("owner_id")?,
            lease_expires_at: row.get("lease_expires_at")?,
            fence: row.get("fence")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobRowFilter {
    pub status: Option<String>,
    pub exclude_statuses: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, lineage_id, status, input_items, publish_enabled, pipeline_epoch,
         last_processed_index, total_count, processed_count, succeeded_count, failed_count,
         error, cancel_requested, owner_id, lease_expires_at, fence, created_at, started_at,
         completed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
         ?18, ?19, ?20)",
        params![
            job.id,
            job.lineage_id,
            job.status,
            job.input_items,
            job.publish_enabled,
            job.pipeline_epoch,
            job.last_processed_index,
            job.total_count,
            job.processed_count,
            job.succeeded_count,
            job.failed_count,
            job.error,
            job.cancel_requested,
            job.owner_id,
            job.lease_expires_at,
            job.fence,
            job.created_at,
            job.started_at,
            job.completed_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Writes the owner-controlled progress columns of a job.
///
/// `cancel_requested`, the lease columns and the immutable submission
/// columns are deliberately left out; they have their own writers.
pub fn update_progress(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status=?2, last_processed_index=?3, total_count=?4,
         processed_count=?5, succeeded_count=?6, failed_count=?7, error=?8,
         started_at=?9, completed_at=?10, updated_at=?11
         WHERE id=?1",
        params![
            job.id,
            job.status,
            job.last_processed_index,
            job.total_count,
            job.processed_count,
            job.succeeded_count,
            job.failed_count,
            job.error,
            job.started_at,
            job.completed_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Sets the lease columns and fence of a job.
pub fn update_lease(
    conn: &Connection,
    id: &str,
    owner_id: Option<&str>,
    lease_expires_at: Option<&str>,
    fence: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET owner_id=?2, lease_expires_at=?3, fence=?4 WHERE id=?1",
        params![id, owner_id, lease_expires_at, fence],
    )?;
    Ok(())
}

/// Raises the cancellation flag. Returns the number of rows touched.
pub fn set_cancel_requested(
    conn: &Connection,
    id: &str,
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET cancel_requested = 1, updated_at = ?2 WHERE id = ?1",
        params![id, updated_at],
    )?;
    Ok(changed)
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    Ok(row)
}

/// Queries jobs with filters, newest first.
pub fn query(conn: &Connection, filter: &JobRowFilter) -> Result<Vec<JobRow>, DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.clone()));
    }
    for excluded in &filter.exclude_statuses {
        conditions.push(format!("status != ?{}", param_values.len() + 1));
        param_values.push(Box::new(excluded.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let query_sql = format!(
        "SELECT * FROM jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows: Vec<JobRow> = stmt
        .query_map(params_ref.as_slice(), JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

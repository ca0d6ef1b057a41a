//! Item repository — row-level operations for the `job_items` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw item row. Stage payloads are stored as JSON text.
#[derive(Debug, Clone)]
pub struct ItemRow {
    pub job_id: String,
    pub identifier: String,
    pub position: i64,
    pub stage: String,
    pub outcome: Option<String>,
    pub metadata: Option<String>,
    pub images: Option<String>,
    pub price: Option<String>,
    pub idempotency_key: Option<String>,
    pub listing_reference: Option<String>,
    pub error_detail: Option<String>,
    pub attempts: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            identifier: row.get("identifier")?,
            position: row.get("position")?,
            stage: row.get("stage")?,
            outcome: row.get("outcome")?,
            metadata: row.get("metadata")?,
            images: row.get("images")?,
            price: row.get("price")?,
            idempotency_key: row.get("idempotency_key")?,
            listing_reference: row.get("listing_reference")?,
            error_detail: row.get("error_detail")?,
            attempts: row.get("attempts")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts or overwrites an item row. `created_at` keeps its first value.
pub fn upsert(conn: &Connection, item: &ItemRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_items (job_id, identifier, position, stage, outcome, metadata, images,
         price, idempotency_key, listing_reference, error_detail, attempts, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT (job_id, identifier) DO UPDATE SET
            position=excluded.position, stage=excluded.stage, outcome=excluded.outcome,
            metadata=excluded.metadata, images=excluded.images, price=excluded.price,
            idempotency_key=excluded.idempotency_key,
            listing_reference=excluded.listing_reference,
            error_detail=excluded.error_detail, attempts=excluded.attempts,
            updated_at=excluded.updated_at",
        params![
            item.job_id,
            item.identifier,
            item.position,
            item.stage,
            item.outcome,
            item.metadata,
            item.images,
            item.price,
            item.idempotency_key,
            item.listing_reference,
            item.error_detail,
            item.attempts,
            item.created_at,
            item.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds one item by its `(job_id, identifier)` key.
pub fn find(
    conn: &Connection,
    job_id: &str,
    identifier: &str,
) -> Result<Option<ItemRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM job_items WHERE job_id = ?1 AND identifier = ?2",
            params![job_id, identifier],
            ItemRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists all items of a job in input order.
pub fn list_by_job(conn: &Connection, job_id: &str) -> Result<Vec<ItemRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM job_items WHERE job_id = ?1 ORDER BY position ASC")?;
    let rows = stmt
        .query_map(params![job_id], ItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Lists items of a job with the given outcome, in input order.
pub fn list_by_outcome(
    conn: &Connection,
    job_id: &str,
    outcome: &str,
) -> Result<Vec<ItemRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM job_items WHERE job_id = ?1 AND outcome = ?2 ORDER BY position ASC",
    )?;
    let rows = stmt
        .query_map(params![job_id, outcome], ItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts items of a job grouped by stage.
pub fn count_by_stage(conn: &Connection, job_id: &str) -> Result<Vec<(String, u64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT stage, COUNT(*) FROM job_items WHERE job_id = ?1 GROUP BY stage ORDER BY stage",
    )?;
    let rows = stmt
        .query_map(params![job_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts resolved items at or below `max_position`, grouped by outcome.
pub fn count_resolved_by_outcome(
    conn: &Connection,
    job_id: &str,
    max_position: i64,
) -> Result<Vec<(String, u64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT outcome, COUNT(*) FROM job_items
         WHERE job_id = ?1 AND position <= ?2 AND outcome IS NOT NULL
         GROUP BY outcome",
    )?;
    let rows = stmt
        .query_map(params![job_id, max_position], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

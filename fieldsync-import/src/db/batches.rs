//! Import batch persistence
//!
//! Batch rows are written outside the chunk transactions (create, progress after
//! each commit, finalize), so every write goes through `retry_on_lock`.

use crate::models::{BatchStatus, ErrorDetail, ImportBatch, RowFailure};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Utc};
use fieldsync_common::time::{from_db_timestamp, to_db_timestamp};
use fieldsync_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

/// Insert or update a batch row
pub async fn save_batch(pool: &SqlitePool, batch: &ImportBatch, max_wait_ms: u64) -> Result<()> {
    // Prepare all data before touching the database
    let id = batch.id.to_string();
    let status = batch.status.as_str();
    let started_at = to_db_timestamp(&batch.started_at);
    let completed_at = batch.completed_at.as_ref().map(to_db_timestamp);
    let error_detail = batch
        .error_detail
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize error detail: {}", e)))?;
    let row_errors = serde_json::to_string(&batch.row_errors)
        .map_err(|e| Error::Internal(format!("Failed to serialize row errors: {}", e)))?;

    retry_on_lock("save_batch", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO import_batches (
                id, source_file, total_rows, processed_rows, new_entities,
                updated_entities, status_changes, errors, status,
                started_at, completed_at, error_detail, row_errors
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                processed_rows = excluded.processed_rows,
                new_entities = excluded.new_entities,
                updated_entities = excluded.updated_entities,
                status_changes = excluded.status_changes,
                errors = excluded.errors,
                status = excluded.status,
                completed_at = excluded.completed_at,
                error_detail = excluded.error_detail,
                row_errors = excluded.row_errors
            "#,
        )
        .bind(&id)
        .bind(&batch.source_file)
        .bind(batch.total_rows as i64)
        .bind(batch.processed_rows as i64)
        .bind(batch.new_entities as i64)
        .bind(batch.updated_entities as i64)
        .bind(batch.status_changes as i64)
        .bind(batch.errors as i64)
        .bind(status)
        .bind(&started_at)
        .bind(&completed_at)
        .bind(&error_detail)
        .bind(&row_errors)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

const SELECT_BATCH: &str = r#"
    SELECT id, source_file, total_rows, processed_rows, new_entities,
           updated_entities, status_changes, errors, status,
           started_at, completed_at, error_detail, row_errors
    FROM import_batches
"#;

/// Load a batch by id
pub async fn load_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<ImportBatch>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_BATCH))
        .bind(batch_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Most recently started batch
pub async fn latest_batch(pool: &SqlitePool) -> Result<Option<ImportBatch>> {
    let row = sqlx::query(&format!("{} ORDER BY started_at DESC LIMIT 1", SELECT_BATCH))
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Batches still `running`, other than `exclude`
pub async fn count_running_batches(pool: &SqlitePool, exclude: Option<Uuid>) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM import_batches WHERE status = 'running' AND id != ?",
    )
    .bind(exclude.map(|id| id.to_string()).unwrap_or_default())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Mark batches left `running` since before `older_than` as failed
///
/// Works in pages of at most `page_size` rows so no single statement holds the
/// write lock for long; loops until a page comes back empty. Returns the number
/// of batches marked.
pub async fn mark_abandoned_batches(
    pool: &SqlitePool,
    older_than: DateTime<Utc>,
    page_size: u32,
    max_wait_ms: u64,
) -> Result<u64> {
    if page_size == 0 {
        return Err(Error::InvalidInput("page_size must be at least 1".into()));
    }

    let cutoff = to_db_timestamp(&older_than);
    let now = to_db_timestamp(&Utc::now());
    let detail = serde_json::to_string(&ErrorDetail::new(format!(
        "abandoned: still running at {} (started before {})",
        now, cutoff
    )))
    .map_err(|e| Error::Internal(format!("Failed to serialize error detail: {}", e)))?;

    let mut total = 0u64;
    let mut page = 0u32;
    loop {
        page += 1;
        let marked = retry_on_lock("mark_abandoned_batches", max_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE import_batches
                SET status = 'failed', completed_at = ?, error_detail = ?
                WHERE id IN (
                    SELECT id FROM import_batches
                    WHERE status = 'running' AND started_at < ?
                    ORDER BY started_at
                    LIMIT ?
                )
                "#,
            )
            .bind(&now)
            .bind(&detail)
            .bind(&cutoff)
            .bind(i64::from(page_size))
            .execute(pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if marked == 0 {
            break;
        }
        total += marked;
        info!(page, marked, "Marked abandoned batches as failed");
    }

    if total > 0 {
        warn!(total, "Recovered abandoned batches");
    }
    Ok(total)
}

fn batch_from_row(row: &SqliteRow) -> Result<ImportBatch> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Failed to parse batch id: {}", e)))?;

    let status: String = row.get("status");
    let status = BatchStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown batch status: {}", status)))?;

    let started_at: String = row.get("started_at");
    let started_at = from_db_timestamp(&started_at)
        .ok_or_else(|| Error::Internal(format!("Failed to parse started_at: {}", started_at)))?;

    let completed_at: Option<String> = row.get("completed_at");
    let completed_at = completed_at
        .map(|s| {
            from_db_timestamp(&s)
                .ok_or_else(|| Error::Internal(format!("Failed to parse completed_at: {}", s)))
        })
        .transpose()?;

    let error_detail: Option<String> = row.get("error_detail");
    let error_detail = error_detail
        .map(|s| serde_json::from_str::<ErrorDetail>(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize error detail: {}", e)))?;

    let row_errors: String = row.get("row_errors");
    let row_errors: Vec<RowFailure> = serde_json::from_str(&row_errors)
        .map_err(|e| Error::Internal(format!("Failed to deserialize row errors: {}", e)))?;

    let count = |name: &str| row.get::<i64, _>(name).max(0) as u64;

    Ok(ImportBatch {
        id,
        source_file: row.get("source_file"),
        total_rows: count("total_rows"),
        processed_rows: count("processed_rows"),
        new_entities: count("new_entities"),
        updated_entities: count("updated_entities"),
        status_changes: count("status_changes"),
        errors: count("errors"),
        status,
        started_at,
        completed_at,
        error_detail,
        row_errors,
    })
}

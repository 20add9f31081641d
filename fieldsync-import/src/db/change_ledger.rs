//! Change ledger (`change_ledger`) operations
//!
//! Append-only: there is no update or delete here.

use crate::models::{ChangeEvent, ChangeType, EntityType, LedgerEntry};
use fieldsync_common::time::{from_db_timestamp, to_db_timestamp};
use fieldsync_common::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Append one event, returning the ledger row id
pub async fn append_event(
    conn: &mut SqliteConnection,
    event: &ChangeEvent,
    record_id: i64,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO change_ledger (
            entity_type, entity_id, field_name, old_value, new_value,
            source_file, batch_id, change_type, record_id, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.entity_type.as_str())
    .bind(&event.entity_id)
    .bind(&event.field_name)
    .bind(&event.old_value)
    .bind(&event.new_value)
    .bind(&event.source_file)
    .bind(event.batch_id.to_string())
    .bind(event.change_type.as_str())
    .bind(record_id)
    .bind(to_db_timestamp(&event.recorded_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Ledger entries for a batch in append order, optionally limited
pub async fn events_for_batch(
    pool: &SqlitePool,
    batch_id: Uuid,
    limit: Option<u32>,
) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, entity_type, entity_id, field_name, old_value, new_value,
               source_file, batch_id, change_type, record_id, recorded_at
        FROM change_ledger
        WHERE batch_id = ?
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(batch_id.to_string())
    .bind(limit.map(i64::from).unwrap_or(-1))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<LedgerEntry> {
            let entity_type = match row.get::<String, _>("entity_type").as_str() {
                "pole" => EntityType::Pole,
                _ => EntityType::Property,
            };
            let change_type: String = row.get("change_type");
            let change_type = ChangeType::parse(&change_type)
                .ok_or_else(|| Error::Internal(format!("Unknown change type: {}", change_type)))?;
            let batch_id: String = row.get("batch_id");
            let batch_id = Uuid::parse_str(&batch_id)
                .map_err(|e| Error::Internal(format!("Failed to parse batch id: {}", e)))?;
            let recorded_at: String = row.get("recorded_at");
            let recorded_at = from_db_timestamp(&recorded_at)
                .ok_or_else(|| Error::Internal(format!("Failed to parse recorded_at: {}", recorded_at)))?;

            Ok(LedgerEntry {
                id: row.get("id"),
                record_id: row.get("record_id"),
                event: ChangeEvent {
                    entity_type,
                    entity_id: row.get("entity_id"),
                    field_name: row.get("field_name"),
                    old_value: row.get("old_value"),
                    new_value: row.get("new_value"),
                    source_file: row.get("source_file"),
                    batch_id,
                    change_type,
                    recorded_at,
                },
            })
        })
        .collect()
}

/// Number of ledger entries written by a batch
pub async fn count_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM change_ledger WHERE batch_id = ?")
        .bind(batch_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Update events per field for one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChangeSummary {
    pub field_name: String,
    pub changes: i64,
    pub entities: i64,
}

pub async fn field_change_summary(
    pool: &SqlitePool,
    batch_id: Uuid,
) -> Result<Vec<FieldChangeSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT field_name, COUNT(*) AS changes, COUNT(DISTINCT entity_id) AS entities
        FROM change_ledger
        WHERE batch_id = ? AND change_type = 'update'
        GROUP BY field_name
        ORDER BY changes DESC, field_name
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| FieldChangeSummary {
            field_name: row.get("field_name"),
            changes: row.get("changes"),
            entities: row.get("entities"),
        })
        .collect())
}

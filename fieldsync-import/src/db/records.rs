//! Canonical store (`installation_records`) operations

use crate::models::{CanonicalField, CanonicalRecord, FieldValue};
use crate::services::quality_scorer::QualityTier;
use chrono::{DateTime, Utc};
use fieldsync_common::time::to_db_timestamp;
use fieldsync_common::Result;
use once_cell::sync::Lazy;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

static INSERT_SQL: Lazy<String> = Lazy::new(|| {
    let columns: Vec<&str> = CanonicalField::ALL.iter().map(|f| f.column_name()).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO installation_records (source_file, natural_id, row_number, {}, \
         extra_fields, data_quality_score, last_modified_at, batch_id, created_at, updated_at, processed_at) \
         VALUES (?, ?, ?, {}, ?, ?, ?, ?, ?, ?, ?)",
        columns.join(", "),
        placeholders
    )
});

static UPDATE_SQL: Lazy<String> = Lazy::new(|| {
    let assignments: Vec<String> = CanonicalField::ALL
        .iter()
        .map(|f| format!("{} = ?", f.column_name()))
        .collect();
    format!(
        "UPDATE installation_records SET row_number = ?, {}, extra_fields = ?, \
         data_quality_score = ?, last_modified_at = ?, batch_id = ?, updated_at = ?, processed_at = ? \
         WHERE id = ?",
        assignments.join(", ")
    )
});

/// Existing record, as seen by the reconciler
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingRecord {
    pub id: i64,
    /// Text form of each requested field (`NULL` → `None`)
    pub values: BTreeMap<CanonicalField, Option<String>>,
}

/// Look up a record by natural key, reading `fields` as text
pub async fn find_by_natural_key(
    conn: &mut SqliteConnection,
    source_file: &str,
    natural_id: &str,
    fields: &[CanonicalField],
) -> sqlx::Result<Option<ExistingRecord>> {
    let mut select = String::from("SELECT id");
    for field in fields {
        select.push_str(&format!(", CAST({0} AS TEXT) AS {0}", field.column_name()));
    }
    select.push_str(" FROM installation_records WHERE source_file = ? AND natural_id = ?");

    let row = sqlx::query(&select)
        .bind(source_file)
        .bind(natural_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| -> sqlx::Result<ExistingRecord> {
        let mut values = BTreeMap::new();
        for field in fields {
            let value: Option<String> = row.try_get(field.column_name())?;
            values.insert(*field, value);
        }
        Ok(ExistingRecord {
            id: row.try_get("id")?,
            values,
        })
    })
    .transpose()
}

/// Insert a new record, returning its row id
pub async fn insert_record(
    conn: &mut SqliteConnection,
    record: &CanonicalRecord,
    natural_id: &str,
    batch_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<i64> {
    let now = to_db_timestamp(&now);

    let mut query = sqlx::query(INSERT_SQL.as_str())
        .bind(record.source_file.clone())
        .bind(natural_id.to_string())
        .bind(record.row_number as i64);
    for field in CanonicalField::ALL {
        query = bind_value(query, record.get(field));
    }
    let result = query
        .bind(extra_json(record)?)
        .bind(record.quality_score)
        .bind(record.last_modified_at.as_ref().map(to_db_timestamp))
        .bind(batch_id.to_string())
        .bind(now.clone())
        .bind(now.clone())
        .bind(now)
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Overwrite an existing record with the incoming snapshot values
pub async fn update_record(
    conn: &mut SqliteConnection,
    id: i64,
    record: &CanonicalRecord,
    batch_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    let now = to_db_timestamp(&now);

    let mut query = sqlx::query(UPDATE_SQL.as_str()).bind(record.row_number as i64);
    for field in CanonicalField::ALL {
        query = bind_value(query, record.get(field));
    }
    query
        .bind(extra_json(record)?)
        .bind(record.quality_score)
        .bind(record.last_modified_at.as_ref().map(to_db_timestamp))
        .bind(batch_id.to_string())
        .bind(now.clone())
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Option<&FieldValue>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        None | Some(FieldValue::Null) => query.bind(None::<String>),
        Some(FieldValue::Integer(i)) => query.bind(*i),
        Some(FieldValue::Float(f)) => query.bind(*f),
        Some(FieldValue::Text(s)) => query.bind(s.clone()),
    }
}

fn extra_json(record: &CanonicalRecord) -> sqlx::Result<String> {
    serde_json::to_string(&record.extra).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Total records in the store
pub async fn count_records(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM installation_records")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Quality score distribution for records last written by a batch
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct QualitySummary {
    pub excellent: u64,
    pub good: u64,
    pub fair: u64,
    pub poor: u64,
    pub average: Option<f64>,
}

pub async fn quality_summary(pool: &SqlitePool, batch_id: Uuid) -> Result<QualitySummary> {
    let scores: Vec<f64> = sqlx::query_scalar(
        "SELECT data_quality_score FROM installation_records WHERE batch_id = ?",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut summary = QualitySummary::default();
    for score in &scores {
        match QualityTier::for_score(*score) {
            QualityTier::Excellent => summary.excellent += 1,
            QualityTier::Good => summary.good += 1,
            QualityTier::Fair => summary.fair += 1,
            QualityTier::Poor => summary.poor += 1,
        }
    }
    if !scores.is_empty() {
        let average = scores.iter().sum::<f64>() / scores.len() as f64;
        summary.average = Some((average * 100.0).round() / 100.0);
    }

    Ok(summary)
}

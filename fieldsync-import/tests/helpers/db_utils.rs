//! Database test utilities

use anyhow::Result;
use fieldsync_import::models::LedgerEntry;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

/// Temporary on-disk database, initialized the way the CLI does it
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_fieldsync.db");
    let pool = fieldsync_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Run a `SELECT COUNT(*) ...` query
pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

/// Every ledger entry written by a batch, oldest first
pub async fn ledger_for(pool: &SqlitePool, batch_id: Uuid) -> Vec<LedgerEntry> {
    fieldsync_import::db::change_ledger::events_for_batch(pool, batch_id, None)
        .await
        .unwrap()
}

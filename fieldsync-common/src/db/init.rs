//! Database initialization
//!
//! Opens (or creates) the SQLite store, applies connection pragmas on every
//! pooled connection, creates the importer tables and runs pending migrations.
//! Safe to call on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them,
    // not just the first one a PRAGMA statement happens to run on.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    // One importer runs per process; a small pool covers the chunk transaction
    // plus batch bookkeeping.
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_tables(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Create all importer tables (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_installation_records_table(pool).await?;
    create_change_ledger_table(pool).await?;
    create_import_batches_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Canonical store
///
/// One typed column per known canonical field; the column names must match
/// `CanonicalField::column_name()` in the importer. Identifier and numeric
/// columns keep unparsable values as text (SQLite affinity only converts
/// lossless values).
async fn create_installation_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS installation_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_file TEXT NOT NULL,
            natural_id TEXT NOT NULL,
            row_number INTEGER NOT NULL,
            property_id INTEGER,
            one_map_nad_id INTEGER,
            pole_number TEXT,
            drop_number TEXT,
            status TEXT,
            flow_name_groups TEXT,
            sections INTEGER,
            pons INTEGER,
            location TEXT,
            address TEXT,
            latitude REAL,
            longitude REAL,
            field_agent_name TEXT,
            pole_permission_agent TEXT,
            last_modified_by TEXT,
            last_modified_date TEXT,
            stand_number INTEGER,
            contact_number TEXT,
            extra_fields TEXT NOT NULL DEFAULT '{}',
            data_quality_score REAL NOT NULL DEFAULT 0.0,
            last_modified_at TEXT,
            batch_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            UNIQUE (source_file, natural_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only audit ledger of field transitions
async fn create_change_ledger_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS change_ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            source_file TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            change_type TEXT NOT NULL CHECK (change_type IN ('create', 'update')),
            record_id INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per import run
async fn create_import_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_batches (
            id TEXT PRIMARY KEY,
            source_file TEXT NOT NULL,
            total_rows INTEGER NOT NULL,
            processed_rows INTEGER NOT NULL DEFAULT 0,
            new_entities INTEGER NOT NULL DEFAULT 0,
            updated_entities INTEGER NOT NULL DEFAULT 0,
            status_changes INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'running',
            started_at TEXT NOT NULL,
            completed_at TEXT,
            error_detail TEXT,
            row_errors TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

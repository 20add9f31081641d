//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in `schema_version`. Tables are
//! created with their current shape by `init::create_tables`; migrations bring
//! stores written by older builds up to date.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - stores in the field were upgraded with them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Check before altering** - every migration must be safe to run twice

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes
///
/// Secondary-key lookups (drop number) and per-batch ledger queries back the
/// reports; both scan without these.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: lookup indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_records_drop_number ON installation_records(drop_number)",
        "CREATE INDEX IF NOT EXISTS idx_records_batch ON installation_records(batch_id)",
        "CREATE INDEX IF NOT EXISTS idx_ledger_batch ON change_ledger(batch_id)",
        "CREATE INDEX IF NOT EXISTS idx_ledger_entity ON change_ledger(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_batches_status ON import_batches(status, started_at)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: add `row_errors` to import_batches
///
/// Early stores only kept the error count; the per-row failure list was added
/// later so a failed or noisy batch can be inspected without re-running it.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: add row_errors to import_batches");

    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='import_batches'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        info!("  import_batches table doesn't exist yet - skipping migration");
        return Ok(());
    }

    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('import_batches') WHERE name = 'row_errors'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  row_errors column already exists - skipping");
        return Ok(());
    }

    sqlx::query("ALTER TABLE import_batches ADD COLUMN row_errors TEXT NOT NULL DEFAULT '[]'")
        .execute(pool)
        .await?;

    info!("  Added row_errors column to import_batches");
    Ok(())
}

//! Integration tests for database initialization
//!
//! Covers first-run creation, reopening an existing store, the importer table
//! shapes and connection pragmas.

use fieldsync_common::db::{get_schema_version, init_database};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    // Parent directory does not exist yet either
    let db_path = temp_dir.path().join("nested").join("fieldsync.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("fieldsync.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO import_batches (id, source_file, total_rows, started_at) VALUES ('b1', 'a.xlsx', 3, '2024-01-01T00:00:00Z')",
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    // Data survives a reopen
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_batches")
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_all_tables_created() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("fieldsync.db")).await.unwrap();

    for table in ["schema_version", "installation_records", "change_ledger", "import_batches"] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "table {} missing", table);
    }

    assert_eq!(get_schema_version(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn test_natural_key_is_unique() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("fieldsync.db")).await.unwrap();

    let insert = r#"
        INSERT INTO installation_records (
            source_file, natural_id, row_number, batch_id, created_at, updated_at, processed_at
        ) VALUES ('snap.xlsx', '1001', 2, 'b1', 'now', 'now', 'now')
    "#;

    sqlx::query(insert).execute(&pool).await.unwrap();
    let duplicate = sqlx::query(insert).execute(&pool).await;
    assert!(duplicate.is_err(), "second insert with same natural key must fail");
}

#[tokio::test]
async fn test_change_type_is_constrained() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("fieldsync.db")).await.unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO change_ledger (
            entity_type, entity_id, field_name, source_file, batch_id, change_type, record_id, recorded_at
        ) VALUES ('pole', 'P1', 'status', 'a.xlsx', 'b1', 'delete', 1, 'now')
        "#,
    )
    .execute(&pool)
    .await;

    assert!(result.is_err(), "only create/update change types are accepted");
}

#[tokio::test]
async fn test_foreign_keys_enabled_on_every_connection() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("fieldsync.db")).await.unwrap();

    // Hold several connections at once so more than one is checked
    let mut conns = Vec::new();
    for _ in 0..3 {
        conns.push(pool.acquire().await.unwrap());
    }

    for conn in conns.iter_mut() {
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }
}

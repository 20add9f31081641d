//! End-to-end reconcile-mode tests against an on-disk store

mod helpers;

use fieldsync_import::db::{batches, records};
use fieldsync_import::models::{BatchStatus, ChangeType};
use fieldsync_import::services::{BatchReport, FileReportGenerator, ReportGenerator};
use fieldsync_import::{BatchCoordinator, ImportConfig, ImportError, ImportResult, PipelineMode};
use helpers::{count, create_test_db, data_row, ledger_for, snapshot};
use std::path::PathBuf;
use tempfile::TempDir;

fn small_batches(batch_size: usize) -> ImportConfig {
    ImportConfig {
        batch_size,
        ..ImportConfig::default()
    }
}

#[tokio::test]
async fn test_reimport_of_identical_snapshot_records_no_changes() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let coordinator = BatchCoordinator::new(pool.clone(), small_batches(2));

    let rows = || {
        vec![
            data_row(2, "1001", "DR1001", "pending", "2024-01-05 08:00:00"),
            data_row(3, "1002", "DR1002", "approved", "2024-01-06 09:30:00"),
            data_row(4, "1003", "DR1003", "", "2024-01-07 10:00:00"),
        ]
    };

    let first = coordinator
        .run(snapshot("lawley.xlsx", rows()), PipelineMode::Reconcile)
        .await
        .unwrap();
    assert_eq!(first.batch.new_entities, 3);
    assert_eq!(ledger_for(&pool, first.batch.id).await.len(), 3);
    let records_after_first = records::count_records(&pool).await.unwrap();

    let second = coordinator
        .run(snapshot("lawley.xlsx", rows()), PipelineMode::Reconcile)
        .await
        .unwrap();
    assert_eq!(second.batch.status, BatchStatus::Completed);
    assert_eq!(second.batch.new_entities, 0);
    assert_eq!(second.batch.updated_entities, 3);
    assert_eq!(second.batch.status_changes, 0);
    assert!(ledger_for(&pool, second.batch.id).await.is_empty());
    assert_eq!(records::count_records(&pool).await.unwrap(), records_after_first);
}

#[tokio::test]
async fn test_create_event_uses_default_status_when_blank() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let coordinator = BatchCoordinator::new(pool.clone(), ImportConfig::default());

    let outcome = coordinator
        .run(
            snapshot("lawley.xlsx", vec![data_row(2, "1001", "DR1", "", "2024-01-05")]),
            PipelineMode::Reconcile,
        )
        .await
        .unwrap();

    let ledger = ledger_for(&pool, outcome.batch.id).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].event.change_type, ChangeType::Create);
    assert_eq!(ledger[0].event.old_value, None);
    assert_eq!(ledger[0].event.new_value.as_deref(), Some("created"));
}

#[tokio::test]
async fn test_bad_row_is_isolated_from_its_chunk() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let coordinator = BatchCoordinator::new(pool.clone(), ImportConfig::default());

    // Ten data rows in one chunk; the fifth has no property id
    let rows = (0..10)
        .map(|i| {
            let id = if i == 4 { String::new() } else { format!("{}", 2001 + i) };
            data_row(i + 2, &id, &format!("DR{}", i), "pending", "2024-02-01")
        })
        .collect();

    let outcome = coordinator
        .run(snapshot("bad-row.xlsx", rows), PipelineMode::Reconcile)
        .await
        .unwrap();

    let batch = &outcome.batch;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.total_rows, 10);
    assert_eq!(batch.processed_rows, 9);
    assert_eq!(batch.errors, 1);
    assert_eq!(batch.row_errors.len(), 1);
    assert_eq!(batch.row_errors[0].row_number, 6);
    assert!(batch.row_errors[0].message.contains("natural identifier"));

    assert_eq!(records::count_records(&pool).await.unwrap(), 9);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM installation_records WHERE natural_id = '2005'").await,
        0
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM installation_records WHERE natural_id = '2006'").await,
        1
    );

    let stored = batches::load_batch(&pool, batch.id).await.unwrap().unwrap();
    assert_eq!(stored.processed_rows, 9);
    assert_eq!(stored.errors, 1);
    assert_eq!(stored.row_errors, batch.row_errors);
}

#[tokio::test]
async fn test_status_change_logged_before_record_is_overwritten() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let coordinator = BatchCoordinator::new(pool.clone(), ImportConfig::default());

    coordinator
        .run(
            snapshot("lawley.xlsx", vec![data_row(2, "1001", "DR1", "pending", "2024-01-05")]),
            PipelineMode::Reconcile,
        )
        .await
        .unwrap();

    let outcome = coordinator
        .run(
            snapshot("lawley.xlsx", vec![data_row(2, "1001", "DR1", "approved", "2024-01-09")]),
            PipelineMode::Reconcile,
        )
        .await
        .unwrap();
    assert_eq!(outcome.batch.updated_entities, 1);
    assert_eq!(outcome.batch.status_changes, 1);

    let ledger = ledger_for(&pool, outcome.batch.id).await;
    assert_eq!(ledger.len(), 1);
    let event = &ledger[0].event;
    assert_eq!(event.change_type, ChangeType::Update);
    assert_eq!(event.field_name, "status");
    assert_eq!(event.entity_id, "1001");
    assert_eq!(event.old_value.as_deref(), Some("pending"));
    assert_eq!(event.new_value.as_deref(), Some("approved"));

    let status: String = sqlx::query_scalar(
        "SELECT status FROM installation_records WHERE source_file = 'lawley.xlsx' AND natural_id = '1001'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "approved");

    let record_id: i64 = sqlx::query_scalar("SELECT id FROM installation_records WHERE natural_id = '1001'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(ledger[0].record_id, record_id);
}

#[tokio::test]
async fn test_same_natural_id_in_other_file_is_a_separate_record() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let coordinator = BatchCoordinator::new(pool.clone(), ImportConfig::default());

    for file in ["lawley.xlsx", "mohadin.xlsx"] {
        let outcome = coordinator
            .run(
                snapshot(file, vec![data_row(2, "1001", "DR1", "pending", "2024-01-05")]),
                PipelineMode::Reconcile,
            )
            .await
            .unwrap();
        assert_eq!(outcome.batch.new_entities, 1);
    }
    assert_eq!(records::count_records(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn test_commit_failure_fails_batch_and_keeps_earlier_chunks() {
    let (_dir, pool) = create_test_db().await.unwrap();

    // A deferred foreign key violation only surfaces at COMMIT, which makes the
    // second chunk's transaction fail as a whole.
    for statement in [
        "CREATE TABLE audit_parent (id INTEGER PRIMARY KEY)",
        "CREATE TABLE audit_ref (ref INTEGER REFERENCES audit_parent(id) DEFERRABLE INITIALLY DEFERRED)",
        r#"
        CREATE TRIGGER fail_commit_on_1003 AFTER INSERT ON installation_records
        WHEN NEW.natural_id = '1003'
        BEGIN
            INSERT INTO audit_ref (ref) VALUES (999);
        END
        "#,
    ] {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }

    let coordinator = BatchCoordinator::new(pool.clone(), small_batches(2));
    let rows = vec![
        data_row(2, "1001", "DR1", "pending", "2024-01-01"),
        data_row(3, "1002", "DR2", "pending", "2024-01-02"),
        data_row(4, "1003", "DR3", "pending", "2024-01-03"),
        data_row(5, "1004", "DR4", "pending", "2024-01-04"),
        data_row(6, "1005", "DR5", "pending", "2024-01-05"),
    ];

    let err = coordinator
        .run(snapshot("commit-fail.xlsx", rows), PipelineMode::Reconcile)
        .await
        .unwrap_err();
    let batch_id = match err {
        ImportError::BatchFailed { batch_id, message } => {
            assert!(message.starts_with("chunk 2"));
            batch_id
        }
        other => panic!("expected BatchFailed, got {}", other),
    };

    let stored = batches::load_batch(&pool, batch_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Failed);
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.processed_rows, 2);
    let detail = stored.error_detail.unwrap();
    assert!(detail.message.contains("chunk 2"));
    assert!(detail
        .trace
        .iter()
        .chain(std::iter::once(&detail.message))
        .any(|line| line.contains("FOREIGN KEY")));

    // Chunk 1 stays committed; chunk 2 rolled back; chunk 3 never ran
    assert_eq!(records::count_records(&pool).await.unwrap(), 2);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM installation_records WHERE natural_id IN ('1003', '1004', '1005')").await,
        0
    );
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM change_ledger").await, 2);
}

#[tokio::test]
async fn test_ledger_failure_rolls_back_the_rows_own_insert() {
    let (_dir, pool) = create_test_db().await.unwrap();

    // The record insert succeeds, then its create event is rejected
    sqlx::query(
        r#"
        CREATE TRIGGER reject_ledger_for_1003 BEFORE INSERT ON change_ledger
        WHEN NEW.entity_id = '1003'
        BEGIN
            SELECT RAISE(ABORT, 'ledger rejected');
        END
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let coordinator = BatchCoordinator::new(pool.clone(), small_batches(10));
    let rows = vec![
        data_row(2, "1001", "DR1", "pending", "2024-01-01"),
        data_row(3, "1002", "DR2", "pending", "2024-01-02"),
        data_row(4, "1003", "DR3", "pending", "2024-01-03"),
        data_row(5, "1004", "DR4", "pending", "2024-01-04"),
        data_row(6, "1005", "DR5", "pending", "2024-01-05"),
    ];

    let outcome = coordinator
        .run(snapshot("ledger-fail.xlsx", rows), PipelineMode::Reconcile)
        .await
        .unwrap();

    let batch = &outcome.batch;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.processed_rows, 4);
    assert_eq!(batch.new_entities, 4);
    assert_eq!(batch.errors, 1);
    assert_eq!(batch.row_errors[0].row_number, 4);
    assert!(batch.row_errors[0].message.contains("ledger rejected"));

    // No record without its create event
    assert_eq!(records::count_records(&pool).await.unwrap(), 4);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM installation_records WHERE natural_id = '1003'").await,
        0
    );
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM change_ledger").await, 4);
}

#[tokio::test]
async fn test_file_reports_written_after_completed_batch() {
    let (dir, pool) = create_test_db().await.unwrap();
    let report_dir = dir.path().join("reports");
    let config = ImportConfig {
        report_dir: Some(report_dir.clone()),
        ..ImportConfig::default()
    };
    let coordinator = BatchCoordinator::new(pool.clone(), config);

    let outcome = coordinator
        .run(
            snapshot(
                "lawley.xlsx",
                vec![
                    data_row(2, "1001", "DR1", "pending", "2024-01-05"),
                    data_row(3, "1002", "DR2", "approved", "2024-01-06"),
                ],
            ),
            PipelineMode::Reconcile,
        )
        .await
        .unwrap();

    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.report_paths.len(), 3);
    assert!(outcome.report_paths.iter().all(|p| p.starts_with(&report_dir) && p.exists()));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&outcome.report_paths[0]).unwrap()).unwrap();
    assert_eq!(json["batch"]["new_entities"], 2);
    assert_eq!(json["recent_changes"].as_array().unwrap().len(), 2);
    // Every weighted field but the address is present: 0.95
    assert_eq!(json["quality"]["excellent"], 2);
    assert_eq!(json["quality"]["average"], 0.95);
}

struct FailingReports;

impl ReportGenerator for FailingReports {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn generate(&self, _report: &BatchReport) -> ImportResult<Vec<PathBuf>> {
        Err(ImportError::Config("report sink unavailable".into()))
    }
}

#[tokio::test]
async fn test_report_failure_is_a_warning_not_a_failure() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let coordinator = BatchCoordinator::new(pool.clone(), ImportConfig::default())
        .with_report_generator(Box::new(FailingReports));

    let outcome = coordinator
        .run(
            snapshot("lawley.xlsx", vec![data_row(2, "1001", "DR1", "pending", "2024-01-05")]),
            PipelineMode::Reconcile,
        )
        .await
        .unwrap();

    assert_eq!(outcome.batch.status, BatchStatus::Completed);
    assert!(outcome.report_paths.is_empty());
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.code == "REPORT" && w.message.contains("report sink unavailable")));

    let stored = batches::load_batch(&pool, outcome.batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_injected_file_generator_overrides_config() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let out = TempDir::new().unwrap();
    let coordinator = BatchCoordinator::new(pool.clone(), ImportConfig::default())
        .with_report_generator(Box::new(FileReportGenerator::new(out.path())));

    let outcome = coordinator
        .run(
            snapshot("lawley.xlsx", vec![data_row(2, "1001", "DR1", "pending", "2024-01-05")]),
            PipelineMode::Reconcile,
        )
        .await
        .unwrap();
    assert!(outcome.report_paths.iter().all(|p| p.starts_with(out.path())));
    assert!(out.path().join("import-history.log").exists());
}

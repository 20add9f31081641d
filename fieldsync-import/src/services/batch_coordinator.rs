//! Batch coordinator
//!
//! Drives one snapshot through the pipeline:
//!
//! 1. Validate (empty input, required columns). Nothing is written on failure.
//! 2. Map headers and normalize every row.
//! 3. Batch-analysis mode only: status filter, then drop-number dedup.
//! 4. Create the batch row (`running`).
//! 5. Reconcile rows in fixed-size chunks. One transaction per chunk, one
//!    savepoint per row. A row-level error rolls back the row's savepoint and is
//!    counted; a transaction-level error rolls back the chunk and fails the batch.
//! 6. Finalize as `completed`, partition by date window (analysis mode) and hand
//!    the batch to the report generator.
//!
//! Chunks run strictly in order. Committed chunks stay committed when a later
//! chunk fails.

use super::dedup_resolver::DedupResolver;
use super::reconciler::{ReconcileOutcome, ReconciliationEngine};
use super::report_generator::{
    BatchReport, FileReportGenerator, ReportGenerator, REPORT_LEDGER_SAMPLE,
};
use super::row_normalizer::RowNormalizer;
use super::schema_mapper::{MappingTable, SchemaMapper};
use super::window_partitioner::{DateWindow, DateWindowPartitioner};
use crate::config::ImportConfig;
use crate::db::{batches, change_ledger, records};
use crate::error::{ImportError, ImportResult, RowError, ValidationError};
use crate::models::{
    AnalysisBuckets, BatchStatus, CanonicalRecord, ChunkStats, ErrorDetail, ImportBatch,
    ImportOutcome, PipelineWarning, RowFailure, Snapshot,
};
use crate::utils::{begin_monitored, MonitoredTransaction};
use sqlx::{Connection, SqlitePool};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a run does with the normalized rows
#[derive(Debug, Clone)]
pub enum PipelineMode {
    /// Reconcile every row into the store
    Reconcile,
    /// Filter, dedup by drop number, reconcile the survivors, then partition
    /// them by date window
    BatchAnalysis {
        window: DateWindow,
        status_filter: Option<String>,
    },
}

/// A normalized row, or the reason it was rejected before reaching the store
type PreparedRow = Result<CanonicalRecord, RowError>;

/// Analysis-mode work list plus the buckets filled before persistence
struct AnalysisPlan {
    work: Vec<PreparedRow>,
    clean: Vec<CanonicalRecord>,
    buckets: AnalysisBuckets,
}

pub struct BatchCoordinator {
    pool: SqlitePool,
    config: ImportConfig,
    mapper: SchemaMapper,
    normalizer: RowNormalizer,
    engine: ReconciliationEngine,
    dedup: DedupResolver,
    partitioner: DateWindowPartitioner,
    report_generator: Option<Box<dyn ReportGenerator>>,
}

impl BatchCoordinator {
    /// Coordinator over `pool`; a file report generator is attached when the
    /// configuration names a report directory
    pub fn new(pool: SqlitePool, config: ImportConfig) -> Self {
        let mapper = SchemaMapper::new(MappingTable::onemap_v1().with_aliases(&config.column_aliases));
        let engine = ReconciliationEngine::from_config(&config);
        let report_generator = config
            .report_dir
            .clone()
            .map(|dir| Box::new(FileReportGenerator::new(dir)) as Box<dyn ReportGenerator>);

        Self {
            pool,
            config,
            mapper,
            normalizer: RowNormalizer::new(),
            engine,
            dedup: DedupResolver::new(),
            partitioner: DateWindowPartitioner::new(),
            report_generator,
        }
    }

    /// Replace the post-batch report generator
    pub fn with_report_generator(mut self, generator: Box<dyn ReportGenerator>) -> Self {
        self.report_generator = Some(generator);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn mapping_table(&self) -> &MappingTable {
        self.mapper.table()
    }

    /// Run the pipeline over one snapshot
    ///
    /// Configuration and validation failures return before any batch row
    /// exists. A fatal chunk failure returns `ImportError::BatchFailed` after
    /// the batch row has been marked `failed`.
    pub async fn run(&self, snapshot: Snapshot, mode: PipelineMode) -> ImportResult<ImportOutcome> {
        let started = Instant::now();
        self.config.validate()?;
        let source_file = snapshot.source_file.clone();

        if snapshot.rows.is_empty() {
            return Err(ValidationError::EmptyInput { source_file }.into());
        }

        let mapping = self.mapper.map_headers(&snapshot.headers);
        let missing = mapping.missing_required();
        if !missing.is_empty() {
            return Err(ValidationError::MissingRequiredFields {
                source_file,
                missing,
            }
            .into());
        }

        let mut warnings: Vec<PipelineWarning> = mapping
            .warnings
            .iter()
            .map(|message| PipelineWarning::new("SCHEMA_DRIFT", message.clone()))
            .collect();

        let header_count = snapshot.headers.len();
        let prepared: Vec<PreparedRow> = snapshot
            .rows
            .iter()
            .map(|row| -> PreparedRow {
                self.normalizer.check_shape(row, header_count)?;
                Ok(self.normalizer.normalize(&source_file, row, &mapping))
            })
            .collect();

        let (work, mut analysis) = match &mode {
            PipelineMode::Reconcile => (prepared, None),
            PipelineMode::BatchAnalysis { status_filter, .. } => {
                let plan = self.plan_analysis(prepared, status_filter.as_deref());
                (plan.work, Some((plan.clean, plan.buckets)))
            }
        };

        match batches::count_running_batches(&self.pool, None).await {
            Ok(0) => {}
            Ok(running) => {
                warn!(
                    running,
                    "Other import batches are still marked running; concurrent imports are not supported"
                );
                warnings.push(PipelineWarning::new(
                    "RUNNING_BATCHES",
                    format!("{} other batch(es) still marked running", running),
                ));
            }
            Err(e) => warn!(error = %e, "Could not check for running batches"),
        }

        let mut batch = ImportBatch::new(&source_file, snapshot.rows.len() as u64);
        batches::save_batch(&self.pool, &batch, self.config.lock_wait_ms).await?;

        let chunk_count = work.len().div_ceil(self.config.batch_size);
        info!(
            batch_id = %batch.id,
            file = %source_file,
            total_rows = batch.total_rows,
            to_reconcile = work.len(),
            chunks = chunk_count,
            "Batch started"
        );

        for (index, chunk) in work.chunks(self.config.batch_size).enumerate() {
            let chunk_number = index + 1;
            match self.process_chunk(batch.id, chunk_number, chunk).await {
                Ok(stats) => {
                    info!(
                        batch_id = %batch.id,
                        chunk = chunk_number,
                        of = chunk_count,
                        processed = stats.processed_rows,
                        errors = stats.errors,
                        "Chunk committed"
                    );
                    batch.apply_chunk(stats, self.config.max_recorded_row_errors);
                    if let Err(e) =
                        batches::save_batch(&self.pool, &batch, self.config.lock_wait_ms).await
                    {
                        warn!(batch_id = %batch.id, chunk = chunk_number, error = %e, "Progress save failed");
                        warnings.push(PipelineWarning::new(
                            "PROGRESS_SAVE",
                            format!("chunk {}: {}", chunk_number, e),
                        ));
                    }
                }
                Err(err) => return Err(self.fail_batch(batch, chunk_number, err).await),
            }
        }

        batch.transition_to(BatchStatus::Completed)?;
        if let Err(e) = batches::save_batch(&self.pool, &batch, self.config.lock_wait_ms).await {
            warn!(batch_id = %batch.id, error = %e, "Final batch save failed");
            warnings.push(PipelineWarning::new("FINALIZE", e.to_string()));
        }

        let analysis = match (analysis.take(), &mode) {
            (Some((clean, mut buckets)), PipelineMode::BatchAnalysis { window, .. }) => {
                let partition = self.partitioner.partition(&clean, window);
                buckets.first_entry = partition.first_entry;
                buckets.pre_window_duplicate = partition.pre_window_duplicate;
                buckets.after_window = partition.after_window;
                info!(
                    batch_id = %batch.id,
                    first_entry = buckets.first_entry.len(),
                    pre_window_duplicate = buckets.pre_window_duplicate.len(),
                    after_window = buckets.after_window,
                    unallocated = buckets.unallocated.len(),
                    duplicate_removed = buckets.duplicate_removed.len(),
                    filtered_out = buckets.filtered_out.len(),
                    "Window partition complete"
                );
                Some(buckets)
            }
            _ => None,
        };

        let mut report_paths = Vec::new();
        if let Some(generator) = &self.report_generator {
            let result = match self.build_report(&batch).await {
                Ok(report) => generator.generate(&report),
                Err(e) => Err(e),
            };
            match result {
                Ok(paths) => report_paths = paths,
                Err(e) => {
                    warn!(batch_id = %batch.id, generator = generator.name(), error = %e, "Report generation failed");
                    warnings.push(PipelineWarning::new("REPORT", e.to_string()));
                }
            }
        }

        let outcome = ImportOutcome {
            batch,
            warnings,
            analysis,
            report_paths,
            duration: started.elapsed(),
        };
        info!(
            batch_id = %outcome.batch.id,
            processed = outcome.batch.processed_rows,
            new = outcome.batch.new_entities,
            updated = outcome.batch.updated_entities,
            status_changes = outcome.batch.status_changes,
            errors = outcome.batch.errors,
            rows_per_sec = %format!("{:.1}", outcome.rows_per_second()),
            "Batch completed"
        );
        Ok(outcome)
    }

    fn plan_analysis(&self, prepared: Vec<PreparedRow>, status_filter: Option<&str>) -> AnalysisPlan {
        let mut work: Vec<PreparedRow> = Vec::new();
        let mut candidates = Vec::new();
        let mut buckets = AnalysisBuckets::default();

        for item in prepared {
            match item {
                Err(row_error) => work.push(Err(row_error)),
                Ok(record) => match status_filter {
                    Some(wanted) if record.status().as_deref().map(str::trim) != Some(wanted.trim()) => {
                        buckets.filtered_out.push(record)
                    }
                    _ => candidates.push(record),
                },
            }
        }

        let dedup = self.dedup.resolve(candidates);
        work.extend(dedup.clean.iter().cloned().map(Ok));
        work.sort_by_key(|item| match item {
            Ok(record) => record.row_number,
            Err(row_error) => row_error.row(),
        });
        buckets.unallocated = dedup.unallocated;
        buckets.duplicate_removed = dedup.duplicate_removed;

        AnalysisPlan {
            work,
            clean: dedup.clean,
            buckets,
        }
    }

    /// One chunk in one transaction; the statistics only count once it commits
    async fn process_chunk(
        &self,
        batch_id: Uuid,
        chunk_number: usize,
        rows: &[PreparedRow],
    ) -> ImportResult<ChunkStats> {
        let mut tx = begin_monitored(&self.pool, "batch_coordinator::chunk").await?;
        let mut stats = ChunkStats::default();

        match self.apply_rows(&mut tx, batch_id, rows, &mut stats).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(stats)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(chunk = chunk_number, error = %rollback_err, "Chunk rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn apply_rows(
        &self,
        tx: &mut MonitoredTransaction<'_>,
        batch_id: Uuid,
        rows: &[PreparedRow],
        stats: &mut ChunkStats,
    ) -> ImportResult<()> {
        for item in rows {
            let record = match item {
                Ok(record) => record,
                Err(row_error) => {
                    warn!(row = row_error.row(), error = %row_error, "Row skipped");
                    stats.record_failure(RowFailure::new(row_error.row(), row_error.to_string()));
                    continue;
                }
            };

            let mut savepoint = tx.conn()?.begin().await?;
            match self.engine.reconcile(&mut *savepoint, record, batch_id).await {
                Ok(outcome) => {
                    savepoint.commit().await?;
                    stats.processed_rows += 1;
                    match outcome {
                        ReconcileOutcome::Created { record_id } => {
                            debug!(row = record.row_number, record_id, "Record created");
                            stats.new_entities += 1;
                        }
                        ReconcileOutcome::Updated {
                            record_id,
                            changes,
                            status_changed,
                        } => {
                            debug!(row = record.row_number, record_id, changes, "Record updated");
                            stats.updated_entities += 1;
                            if status_changed {
                                stats.status_changes += 1;
                            }
                        }
                    }
                }
                Err(row_error) if row_error.is_fatal() => {
                    error!(row = row_error.row(), error = %row_error, "Connection lost during row");
                    return Err(row_error.into());
                }
                Err(row_error) => {
                    savepoint.rollback().await?;
                    warn!(row = row_error.row(), error = %row_error, "Row failed, skipped");
                    stats.record_failure(RowFailure::new(row_error.row(), row_error.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Mark the batch failed and build the error returned to the caller
    async fn fail_batch(&self, mut batch: ImportBatch, chunk_number: usize, err: ImportError) -> ImportError {
        error!(
            batch_id = %batch.id,
            chunk = chunk_number,
            processed = batch.processed_rows,
            error = %err,
            "Chunk failed, batch aborted"
        );

        let message = format!("chunk {}: {}", chunk_number, err);
        let mut detail = ErrorDetail::from_error(&err);
        detail.message = message.clone();

        if let Err(transition_err) = batch.fail(detail) {
            error!(batch_id = %batch.id, error = %transition_err, "Batch could not be marked failed");
        } else if let Err(save_err) =
            batches::save_batch(&self.pool, &batch, self.config.lock_wait_ms).await
        {
            error!(batch_id = %batch.id, error = %save_err, "Failed batch state was not saved");
        }

        ImportError::BatchFailed {
            batch_id: batch.id,
            message,
        }
    }

    async fn build_report(&self, batch: &ImportBatch) -> ImportResult<BatchReport> {
        Ok(BatchReport {
            batch: batch.clone(),
            status_changes: change_ledger::field_change_summary(&self.pool, batch.id).await?,
            quality: records::quality_summary(&self.pool, batch.id).await?,
            recent_changes: change_ledger::events_for_batch(&self.pool, batch.id, Some(REPORT_LEDGER_SAMPLE))
                .await?,
        })
    }
}

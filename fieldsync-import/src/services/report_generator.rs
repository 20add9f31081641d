//! Post-batch reports
//!
//! The coordinator gathers a `BatchReport` after a completed batch and hands it
//! to the injected `ReportGenerator`. A report failure never touches the batch:
//! it is surfaced as a pipeline warning.

use crate::db::change_ledger::FieldChangeSummary;
use crate::db::records::QualitySummary;
use crate::error::{ImportError, ImportResult};
use crate::models::{ImportBatch, LedgerEntry};
use fieldsync_common::time::to_db_timestamp;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Ledger entries included in a report
pub const REPORT_LEDGER_SAMPLE: u32 = 20;

/// Append-only run history inside the report directory
pub const HISTORY_LOG_FILE: &str = "import-history.log";

/// Everything a report is built from
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: ImportBatch,
    pub status_changes: Vec<FieldChangeSummary>,
    pub quality: QualitySummary,
    pub recent_changes: Vec<LedgerEntry>,
}

/// Post-batch report sink
pub trait ReportGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce the report; returns the files written
    fn generate(&self, report: &BatchReport) -> ImportResult<Vec<PathBuf>>;
}

/// JSON + text report files and a one-line history entry per batch
#[derive(Debug, Clone)]
pub struct FileReportGenerator {
    out_dir: PathBuf,
}

impl FileReportGenerator {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn append_history(&self, batch: &ImportBatch) -> ImportResult<PathBuf> {
        let path = self.out_dir.join(HISTORY_LOG_FILE);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{}", history_line(batch))?;
        Ok(path)
    }
}

impl ReportGenerator for FileReportGenerator {
    fn name(&self) -> &'static str {
        "file"
    }

    fn generate(&self, report: &BatchReport) -> ImportResult<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.out_dir)?;
        let stem = format!("import-report-{}", report.batch.id);

        let json_path = self.out_dir.join(format!("{}.json", stem));
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| ImportError::Config(format!("report serialization failed: {}", e)))?;
        std::fs::write(&json_path, json)?;

        let text_path = self.out_dir.join(format!("{}.txt", stem));
        std::fs::write(&text_path, render_text(report))?;

        let history_path = self.append_history(&report.batch)?;

        info!(
            batch_id = %report.batch.id,
            dir = %self.out_dir.display(),
            "Batch report written"
        );
        Ok(vec![json_path, text_path, history_path])
    }
}

/// One history line: timestamp, batch, file, status and counters
pub fn history_line(batch: &ImportBatch) -> String {
    format!(
        "{} batch={} file={} status={} total={} processed={} new={} updated={} status_changes={} errors={}",
        to_db_timestamp(&batch.completed_at.unwrap_or(batch.started_at)),
        batch.id,
        batch.source_file,
        batch.status,
        batch.total_rows,
        batch.processed_rows,
        batch.new_entities,
        batch.updated_entities,
        batch.status_changes,
        batch.errors,
    )
}

/// Human-readable report
pub fn render_text(report: &BatchReport) -> String {
    let batch = &report.batch;
    let mut out = String::new();

    let _ = writeln!(out, "Import report: {}", batch.source_file);
    let _ = writeln!(out, "Batch:    {}", batch.id);
    let _ = writeln!(out, "Status:   {}", batch.status);
    let _ = writeln!(out, "Started:  {}", to_db_timestamp(&batch.started_at));
    if let Some(completed_at) = &batch.completed_at {
        let _ = writeln!(out, "Finished: {}", to_db_timestamp(completed_at));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Rows total:      {}", batch.total_rows);
    let _ = writeln!(out, "Rows processed:  {}", batch.processed_rows);
    let _ = writeln!(out, "New entities:    {}", batch.new_entities);
    let _ = writeln!(out, "Updated:         {}", batch.updated_entities);
    let _ = writeln!(out, "Status changes:  {}", batch.status_changes);
    let _ = writeln!(out, "Errors:          {}", batch.errors);

    let _ = writeln!(out);
    let _ = writeln!(out, "Field changes:");
    if report.status_changes.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for summary in &report.status_changes {
        let _ = writeln!(
            out,
            "  {:<24} {:>6} change(s) across {} entit(ies)",
            summary.field_name, summary.changes, summary.entities
        );
    }

    let quality = &report.quality;
    let _ = writeln!(out);
    let _ = writeln!(out, "Data quality:");
    let _ = writeln!(out, "  Excellent (>= 0.90): {}", quality.excellent);
    let _ = writeln!(out, "  Good      (>= 0.70): {}", quality.good);
    let _ = writeln!(out, "  Fair      (>= 0.50): {}", quality.fair);
    let _ = writeln!(out, "  Poor      (<  0.50): {}", quality.poor);
    match quality.average {
        Some(avg) => {
            let _ = writeln!(out, "  Average score: {:.2}", avg);
        }
        None => {
            let _ = writeln!(out, "  Average score: n/a");
        }
    }

    if !report.recent_changes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Recent changes:");
        for entry in &report.recent_changes {
            let event = &entry.event;
            let _ = writeln!(
                out,
                "  [{}] {} {} {}: {} -> {}",
                event.change_type.as_str(),
                event.entity_type.as_str(),
                event.entity_id,
                event.field_name,
                event.old_value.as_deref().unwrap_or("-"),
                event.new_value.as_deref().unwrap_or("-"),
            );
        }
    }

    if !batch.row_errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Row errors (first {}):", batch.row_errors.len());
        for failure in &batch.row_errors {
            let _ = writeln!(out, "  row {}: {}", failure.row_number, failure.message);
        }
    }

    out
}

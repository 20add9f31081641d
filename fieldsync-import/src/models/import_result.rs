//! Import results, row failures and partial-success warnings

use super::{CanonicalRecord, ImportBatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A skipped row, as recorded on the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_number: usize,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl RowFailure {
    pub fn new(row_number: usize, message: impl Into<String>) -> Self {
        Self {
            row_number,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Failure detail stored on a failed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    /// Source chain, outermost cause first
    pub trace: Vec<String>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Capture an error and its `source()` chain
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut current = err.source();
        while let Some(cause) = current {
            trace.push(cause.to_string());
            current = cause.source();
        }
        Self {
            message: err.to_string(),
            trace,
        }
    }
}

/// Non-fatal error from a secondary write; the primary effect stands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineWarning {
    /// Short code, e.g. "PROGRESS_SAVE", "REPORT"
    pub code: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl PipelineWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Batch-analysis output buckets
///
/// Every input record lands in exactly one of `first_entry`,
/// `pre_window_duplicate`, `unallocated`, `duplicate_removed`, `filtered_out`,
/// or is counted in `after_window`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisBuckets {
    pub first_entry: Vec<CanonicalRecord>,
    pub pre_window_duplicate: Vec<CanonicalRecord>,
    /// Clean records whose key was first seen after the window end
    pub after_window: usize,
    pub unallocated: Vec<CanonicalRecord>,
    pub duplicate_removed: Vec<CanonicalRecord>,
    /// Records dropped by the status filter
    pub filtered_out: Vec<CanonicalRecord>,
}

/// Outcome of one completed pipeline run
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub batch: ImportBatch,
    pub warnings: Vec<PipelineWarning>,
    pub analysis: Option<AnalysisBuckets>,
    pub report_paths: Vec<PathBuf>,
    pub duration: Duration,
}

impl ImportOutcome {
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.batch.processed_rows as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail_captures_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = crate::error::RowError::Persistence {
            row: 4,
            source: sqlx::Error::Io(io),
        };

        let detail = ErrorDetail::from_error(&err);
        assert!(detail.message.starts_with("row 4"));
        assert!(!detail.trace.is_empty());
        assert!(detail.trace.iter().any(|t| t.contains("pipe closed")));
    }

    #[test]
    fn test_rows_per_second() {
        let mut batch = ImportBatch::new("a.csv", 100);
        batch.processed_rows = 100;
        let outcome = ImportOutcome {
            batch,
            warnings: Vec::new(),
            analysis: None,
            report_paths: Vec::new(),
            duration: Duration::from_secs(4),
        };
        assert!((outcome.rows_per_second() - 25.0).abs() < f64::EPSILON);

        let instant = ImportOutcome {
            duration: Duration::ZERO,
            ..outcome
        };
        assert_eq!(instant.rows_per_second(), 0.0);
    }
}

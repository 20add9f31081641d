//! Import batch state machine
//!
//! A batch is created `running` with its row count known, accumulates chunk
//! statistics as chunks commit, and ends in exactly one terminal state:
//! RUNNING → COMPLETED | FAILED

use super::{ErrorDetail, RowFailure};
use crate::error::{ImportError, ImportResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(BatchStatus::Running),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize)]
pub struct BatchTransition {
    pub batch_id: Uuid,
    pub old_status: BatchStatus,
    pub new_status: BatchStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Statistics for one committed chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStats {
    pub processed_rows: u64,
    pub new_entities: u64,
    pub updated_entities: u64,
    pub status_changes: u64,
    pub errors: u64,
    pub failures: Vec<RowFailure>,
}

impl ChunkStats {
    pub fn record_failure(&mut self, failure: RowFailure) {
        self.errors += 1;
        self.failures.push(failure);
    }
}

/// One end-to-end run against one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Uuid,
    pub source_file: String,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub new_entities: u64,
    pub updated_entities: u64,
    pub status_changes: u64,
    pub errors: u64,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<ErrorDetail>,
    /// First N row failures (the `errors` count keeps counting past N)
    pub row_errors: Vec<RowFailure>,
}

impl ImportBatch {
    /// New running batch with the input row count
    pub fn new(source_file: impl Into<String>, total_rows: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_file: source_file.into(),
            total_rows,
            processed_rows: 0,
            new_entities: 0,
            updated_entities: 0,
            status_changes: 0,
            errors: 0,
            status: BatchStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error_detail: None,
            row_errors: Vec::new(),
        }
    }

    /// Transition to a new state; only running batches may move, and only to
    /// a terminal state.
    pub fn transition_to(&mut self, new_status: BatchStatus) -> ImportResult<BatchTransition> {
        if self.status != BatchStatus::Running || !new_status.is_terminal() {
            return Err(ImportError::InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        let transition = BatchTransition {
            batch_id: self.id,
            old_status: self.status,
            new_status,
            transitioned_at: now,
        };
        self.status = new_status;
        self.completed_at = Some(now);

        Ok(transition)
    }

    /// Mark the batch failed with captured detail
    pub fn fail(&mut self, detail: ErrorDetail) -> ImportResult<BatchTransition> {
        let transition = self.transition_to(BatchStatus::Failed)?;
        self.error_detail = Some(detail);
        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold a committed chunk into the running totals
    pub fn apply_chunk(&mut self, stats: ChunkStats, max_recorded_row_errors: usize) {
        self.processed_rows += stats.processed_rows;
        self.new_entities += stats.new_entities;
        self.updated_entities += stats.updated_entities;
        self.status_changes += stats.status_changes;
        self.errors += stats.errors;

        let room = max_recorded_row_errors.saturating_sub(self.row_errors.len());
        self.row_errors.extend(stats.failures.into_iter().take(room));
    }
}

//! Error types for fieldsync-import
//!
//! Three tiers, matching how far a failure is allowed to travel:
//! - `ValidationError`: input rejected before any batch exists
//! - `RowError`: one row skipped, the batch carries on
//! - `ImportError`: everything that escapes to the caller

use crate::models::{BatchStatus, CanonicalField};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum ImportError {
    /// Input rejected before processing began
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error outside any row's own handling
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// fieldsync-common error
    #[error("Common error: {0}")]
    Common(#[from] fieldsync_common::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row failure that took the chunk transaction down with it
    #[error("Fatal row error: {0}")]
    FatalRow(#[from] RowError),

    /// Snapshot file could not be read or decoded
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Invalid import configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Batch state machine violation
    #[error("Invalid batch transition: {from} -> {to}")]
    InvalidTransition { from: BatchStatus, to: BatchStatus },

    /// The run reached `failed`; committed chunks stay committed
    #[error("Batch {batch_id} failed: {message}")]
    BatchFailed { batch_id: Uuid, message: String },
}

/// Result type for pipeline operations
pub type ImportResult<T> = Result<T, ImportError>;

/// Fail-fast input validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{source_file}: snapshot contains no data rows")]
    EmptyInput { source_file: String },

    #[error("{source_file}: missing required columns: {}", format_fields(.missing))]
    MissingRequiredFields {
        source_file: String,
        missing: Vec<CanonicalField>,
    },

    #[error("window start {start} is after window end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

fn format_fields(fields: &[CanonicalField]) -> String {
    fields
        .iter()
        .map(|f| f.column_name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Row-level failure
///
/// Recorded against the batch and skipped. `is_fatal` picks out the persistence
/// failures that actually mean the connection or transaction is gone; those
/// are promoted to a batch failure instead.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("row {row}: {extra_cells} non-empty cell(s) beyond the {headers} header columns")]
    UnexpectedShape {
        row: usize,
        headers: usize,
        extra_cells: usize,
    },

    #[error("row {row}: missing natural identifier ({field})")]
    MissingNaturalId { row: usize, field: CanonicalField },

    #[error("row {row}: persistence failed: {source}")]
    Persistence {
        row: usize,
        #[source]
        source: sqlx::Error,
    },
}

impl RowError {
    /// Spreadsheet row number the error belongs to
    pub fn row(&self) -> usize {
        match self {
            RowError::UnexpectedShape { row, .. }
            | RowError::MissingNaturalId { row, .. }
            | RowError::Persistence { row, .. } => *row,
        }
    }

    /// True when the failure is transaction-level rather than row-level
    pub fn is_fatal(&self) -> bool {
        match self {
            RowError::Persistence { source, .. } => is_connectivity_error(source),
            _ => false,
        }
    }
}

/// Connectivity-class sqlx errors: the connection or pool is unusable, so the
/// enclosing transaction cannot be trusted either.
pub fn is_connectivity_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

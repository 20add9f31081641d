//! Data models for fieldsync-import

pub mod canonical_field;
pub mod change_event;
pub mod import_batch;
pub mod import_result;
pub mod record;

pub use canonical_field::{CanonicalField, FieldKind};
pub use change_event::{ChangeEvent, ChangeType, EntityType, LedgerEntry};
pub use import_batch::{BatchStatus, BatchTransition, ChunkStats, ImportBatch};
pub use import_result::{AnalysisBuckets, ErrorDetail, ImportOutcome, PipelineWarning, RowFailure};
pub use record::{CanonicalRecord, FieldValue, RawRow, Snapshot};

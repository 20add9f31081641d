//! Pipeline services
//!
//! Leaf-first: header mapping, row normalization and scoring, reconciliation,
//! drop-number dedup, window partitioning, then the coordinator that drives a
//! batch. Snapshot loading, bucket export and reports sit at the edges.

pub mod batch_coordinator;
pub mod bucket_export;
pub mod dedup_resolver;
pub mod quality_scorer;
pub mod reconciler;
pub mod report_generator;
pub mod row_normalizer;
pub mod schema_mapper;
pub mod snapshot_loader;
pub mod window_partitioner;

pub use batch_coordinator::{BatchCoordinator, PipelineMode};
pub use bucket_export::export_buckets;
pub use dedup_resolver::{DedupOutcome, DedupResolver};
pub use quality_scorer::{quality_score, QualityTier};
pub use reconciler::{FieldChange, ReconcileOutcome, ReconciliationEngine};
pub use report_generator::{BatchReport, FileReportGenerator, ReportGenerator};
pub use row_normalizer::RowNormalizer;
pub use schema_mapper::{MappingTable, SchemaMapper, SchemaMapping};
pub use snapshot_loader::load_snapshot;
pub use window_partitioner::{DateWindow, DateWindowPartitioner, WindowPartition};

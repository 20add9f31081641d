//! fieldsync-import library interface
//!
//! Incremental reconciliation of field-installation spreadsheet snapshots into
//! the canonical store, with a field-level change ledger and batch history.
//! Exposed as a library so the CLI and the integration tests share one pipeline.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::config::ImportConfig;
pub use crate::error::{ImportError, ImportResult, RowError, ValidationError};
pub use crate::services::{BatchCoordinator, PipelineMode};

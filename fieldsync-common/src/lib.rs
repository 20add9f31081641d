//! # fieldsync Common Library
//!
//! Shared code for the fieldsync snapshot importer:
//! - Error type shared by every crate
//! - Bootstrap configuration loading and root folder resolution
//! - Database initialization and schema migrations
//! - Timestamp parsing for spreadsheet exports

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};

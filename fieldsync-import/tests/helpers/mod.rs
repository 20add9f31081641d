//! Test helper utilities
//!
//! Shared utilities for fieldsync-import integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod snapshots;

pub use db_utils::{count, create_test_db, ledger_for};
pub use snapshots::{data_row, snapshot, write_csv, REQUIRED_HEADERS};

//! Persistence for the canonical store, change ledger and batch table
//!
//! Row-scoped writes take a `&mut SqliteConnection` so they run inside the
//! caller's chunk transaction and row savepoint, and return raw `sqlx` errors so
//! the caller can classify them. Pool-level reads and batch bookkeeping return
//! `fieldsync_common::Result`.

pub mod batches;
pub mod change_ledger;
pub mod records;

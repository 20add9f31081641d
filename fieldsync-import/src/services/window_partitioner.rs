//! Date-window partitioning of deduplicated records
//!
//! Each drop number's first-approval date is the earliest `last_modified_at`
//! across its clean records. All records of a key follow the key:
//! - first approval inside `[start, end]` (inclusive) → first entry
//! - before `start` → pre-window duplicate
//! - after `end` → excluded, counted only
//!
//! Pure; nothing here touches the store.

use crate::error::ValidationError;
use crate::models::CanonicalRecord;
use chrono::{DateTime, Utc};
use fieldsync_common::time::epoch;
use std::collections::HashMap;

/// Inclusive date window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowPartition {
    pub first_entry: Vec<CanonicalRecord>,
    pub pre_window_duplicate: Vec<CanonicalRecord>,
    /// Records whose key was first approved after the window end
    pub after_window: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateWindowPartitioner;

impl DateWindowPartitioner {
    pub fn new() -> Self {
        Self
    }

    /// Partition `clean` records; records without a drop number are ignored
    /// (dedup never puts them in the clean bucket)
    pub fn partition(&self, clean: &[CanonicalRecord], window: &DateWindow) -> WindowPartition {
        let mut first_approval: HashMap<String, DateTime<Utc>> = HashMap::new();
        for record in clean {
            let Some(key) = record.drop_number() else {
                continue;
            };
            let at = record.last_modified_at.unwrap_or_else(epoch);
            first_approval
                .entry(key)
                .and_modify(|earliest| {
                    if at < *earliest {
                        *earliest = at;
                    }
                })
                .or_insert(at);
        }

        let mut partition = WindowPartition::default();
        for record in clean {
            let Some(first) = record.drop_number().and_then(|key| first_approval.get(&key).copied())
            else {
                continue;
            };
            if window.contains(first) {
                partition.first_entry.push(record.clone());
            } else if first < window.start {
                partition.pre_window_duplicate.push(record.clone());
            } else {
                partition.after_window += 1;
            }
        }

        partition
    }
}

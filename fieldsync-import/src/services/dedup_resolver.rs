//! Cross-record dedup by drop number, earliest modification wins
//!
//! Records are grouped by trimmed drop number in first-appearance order. Within
//! a group the record with the earliest `last_modified_at` survives; a missing
//! or unparsable date sorts as the Unix epoch and therefore wins. Ties keep
//! input order.

use crate::models::CanonicalRecord;
use fieldsync_common::time::epoch;
use std::collections::HashMap;
use tracing::{debug, info};

/// Every input record lands in exactly one bucket
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub clean: Vec<CanonicalRecord>,
    /// No drop number
    pub unallocated: Vec<CanonicalRecord>,
    /// Displaced by an earlier record with the same drop number
    pub duplicate_removed: Vec<CanonicalRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DedupResolver;

impl DedupResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, records: Vec<CanonicalRecord>) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();
        let mut group_index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<CanonicalRecord>> = Vec::new();

        for record in records {
            let Some(key) = record.drop_number() else {
                outcome.unallocated.push(record);
                continue;
            };
            let index = *group_index.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[index].push(record);
        }

        for mut group in groups {
            if group.len() > 1 {
                // Stable: equal timestamps keep input order
                group.sort_by_key(|r| r.last_modified_at.unwrap_or_else(epoch));
                debug!(
                    drop_number = ?group[0].drop_number(),
                    displaced = group.len() - 1,
                    "Duplicate drop number resolved"
                );
            }
            let mut members = group.into_iter();
            if let Some(survivor) = members.next() {
                outcome.clean.push(survivor);
            }
            outcome.duplicate_removed.extend(members);
        }

        info!(
            clean = outcome.clean.len(),
            unallocated = outcome.unallocated.len(),
            duplicates = outcome.duplicate_removed.len(),
            "Dedup complete"
        );
        outcome
    }
}

//! Data quality score
//!
//! Weighted completeness over a fixed set of key fields. Recomputed on every
//! write; never carried over from an earlier import.

use crate::models::{CanonicalField, FieldValue};
use serde::Serialize;
use std::collections::BTreeMap;

/// Key fields and their weights (sum to 1.0)
pub const QUALITY_WEIGHTS: [(CanonicalField, f64); 7] = [
    (CanonicalField::PropertyId, 0.20),
    (CanonicalField::Status, 0.20),
    (CanonicalField::DropNumber, 0.15),
    (CanonicalField::Latitude, 0.15),
    (CanonicalField::Longitude, 0.15),
    (CanonicalField::FieldAgentName, 0.10),
    (CanonicalField::Address, 0.05),
];

/// Score in `[0.0, 1.0]`, rounded to 2 decimal places
pub fn quality_score(fields: &BTreeMap<CanonicalField, FieldValue>) -> f64 {
    let (present, total) = QUALITY_WEIGHTS
        .iter()
        .fold((0.0, 0.0), |(present, total), (field, weight)| {
            let has_value = fields.get(field).is_some_and(|v| !v.is_null());
            (if has_value { present + weight } else { present }, total + weight)
        });

    if total <= 0.0 {
        return 0.0;
    }
    ((present / total) * 100.0).round() / 100.0
}

/// Report bucket for a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    pub fn for_score(score: f64) -> Self {
        if score >= 0.9 {
            QualityTier::Excellent
        } else if score >= 0.7 {
            QualityTier::Good
        } else if score >= 0.5 {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }
}

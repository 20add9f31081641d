//! Raw row → canonical record
//!
//! Coercion is decided by the destination field's kind. Parse failures keep
//! the original text instead of rejecting the row; only the row's shape is
//! checked here, and that check is separate from normalization.

use super::quality_scorer::quality_score;
use super::schema_mapper::{ColumnTarget, SchemaMapping};
use crate::error::RowError;
use crate::models::{CanonicalField, CanonicalRecord, FieldKind, FieldValue, RawRow};
use chrono::SecondsFormat;
use fieldsync_common::time::parse_timestamp;
use std::collections::BTreeMap;
use tracing::debug;

/// Field carrying the in-file natural identifier
pub const NATURAL_ID_FIELD: CanonicalField = CanonicalField::PropertyId;

#[derive(Debug, Clone, Copy, Default)]
pub struct RowNormalizer;

impl RowNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Reject rows with non-blank cells past the last header column
    pub fn check_shape(&self, row: &RawRow, header_count: usize) -> Result<(), RowError> {
        let extra_cells = row
            .cells
            .iter()
            .skip(header_count)
            .filter(|c| !c.trim().is_empty())
            .count();
        if extra_cells > 0 {
            return Err(RowError::UnexpectedShape {
                row: row.row_number,
                headers: header_count,
                extra_cells,
            });
        }
        Ok(())
    }

    /// Normalize one row; always produces a record
    pub fn normalize(&self, source_file: &str, row: &RawRow, mapping: &SchemaMapping) -> CanonicalRecord {
        let mut fields: BTreeMap<CanonicalField, FieldValue> = BTreeMap::new();
        let mut extra: BTreeMap<String, FieldValue> = BTreeMap::new();

        for (index, raw) in row.cells.iter().enumerate() {
            let Some(target) = mapping.target(index) else {
                continue;
            };
            match target {
                ColumnTarget::Canonical(field) => {
                    let value = coerce(field.kind(), raw);
                    // Several columns may feed one field: first non-null wins
                    let slot = fields.entry(*field).or_insert(FieldValue::Null);
                    if slot.is_null() {
                        *slot = value;
                    }
                }
                ColumnTarget::Extra(name) => {
                    let value = coerce(FieldKind::Text, raw);
                    let slot = extra.entry(name.clone()).or_insert(FieldValue::Null);
                    if slot.is_null() {
                        *slot = value;
                    }
                }
            }
        }

        split_location(&mut fields);

        let natural_id = fields
            .get(&NATURAL_ID_FIELD)
            .and_then(FieldValue::as_text)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let last_modified_at = row
            .cells
            .iter()
            .enumerate()
            .filter(|(index, _)| {
                mapping.target(*index) == Some(&ColumnTarget::Canonical(CanonicalField::LastModifiedDate))
            })
            .find_map(|(_, raw)| parse_timestamp(raw));

        let quality_score = quality_score(&fields);
        debug!(row = row.row_number, quality_score, "Row normalized");

        CanonicalRecord {
            source_file: source_file.to_string(),
            natural_id,
            row_number: row.row_number,
            fields,
            extra,
            quality_score,
            last_modified_at,
        }
    }
}

/// Coerce one raw cell by field kind; blank → `Null`
pub fn coerce(kind: FieldKind, raw: &str) -> FieldValue {
    let value = raw.trim();
    if value.is_empty() {
        return FieldValue::Null;
    }

    match kind {
        FieldKind::Identifier | FieldKind::Numeric => parse_integer(value)
            .map(FieldValue::Integer)
            .unwrap_or_else(|| FieldValue::Text(value.to_string())),
        FieldKind::Coordinate => value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(FieldValue::Float)
            .unwrap_or_else(|| FieldValue::Text(value.to_string())),
        FieldKind::Date => FieldValue::Text(
            parse_timestamp(value)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                .unwrap_or_else(|| value.to_string()),
        ),
        FieldKind::Text => FieldValue::Text(value.to_string()),
    }
}

/// Integers, including whole-valued decimals spreadsheets emit ("1001.0")
fn parse_integer(value: &str) -> Option<i64> {
    if let Ok(i) = value.parse::<i64>() {
        return Some(i);
    }
    let f = value.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}

/// Fill absent coordinates from a `"lat, lng"` location value
fn split_location(fields: &mut BTreeMap<CanonicalField, FieldValue>) {
    let present = |fields: &BTreeMap<CanonicalField, FieldValue>, field: CanonicalField| {
        fields.get(&field).is_some_and(|v| !v.is_null())
    };
    if present(fields, CanonicalField::Latitude) && present(fields, CanonicalField::Longitude) {
        return;
    }

    let Some(FieldValue::Text(location)) = fields.get(&CanonicalField::Location) else {
        return;
    };
    let parts: Vec<&str> = location.split(',').map(str::trim).collect();
    let [lat, lng] = parts.as_slice() else {
        return;
    };
    let (Ok(lat), Ok(lng)) = (lat.parse::<f64>(), lng.parse::<f64>()) else {
        return;
    };
    if !lat.is_finite() || !lng.is_finite() {
        return;
    }

    if !present(fields, CanonicalField::Latitude) {
        fields.insert(CanonicalField::Latitude, FieldValue::Float(lat));
    }
    if !present(fields, CanonicalField::Longitude) {
        fields.insert(CanonicalField::Longitude, FieldValue::Float(lng));
    }
}

//! Snapshot rows and canonical records

use super::CanonicalField;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One spreadsheet row, cells in header order
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Spreadsheet row number (header row = 1)
    pub row_number: usize,
    pub cells: Vec<String>,
}

impl RawRow {
    pub fn new(row_number: usize, cells: Vec<String>) -> Self {
        Self { row_number, cells }
    }

    /// True when every cell is blank
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }
}

/// One loaded snapshot: headers plus data rows
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Base name of the file the rows came from (part of the natural key)
    pub source_file: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Normalized cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Text form used for change detection, exports and the ledger
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Text(s) if s.is_empty() => None,
            FieldValue::Text(s) => Some(s.clone()),
        }
    }
}

/// Normalized installation record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub source_file: String,
    /// In-file identifier; `None` when the identifier column was blank
    pub natural_id: Option<String>,
    pub row_number: usize,
    pub fields: BTreeMap<CanonicalField, FieldValue>,
    /// Columns with no canonical field, keyed by generated name
    pub extra: BTreeMap<String, FieldValue>,
    pub quality_score: f64,
    /// Parsed from the source's last-modified date, never wall-clock
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl CanonicalRecord {
    pub fn get(&self, field: CanonicalField) -> Option<&FieldValue> {
        self.fields.get(&field).filter(|v| !v.is_null())
    }

    pub fn text(&self, field: CanonicalField) -> Option<String> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn status(&self) -> Option<String> {
        self.text(CanonicalField::Status)
    }

    /// Secondary (dedup) key, trimmed; `None` when absent or blank
    pub fn drop_number(&self) -> Option<String> {
        self.text(CanonicalField::DropNumber)
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
    }
}

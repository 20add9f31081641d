//! Snapshot builders
//!
//! Rows follow `REQUIRED_HEADERS`: property id, drop number, status, latitude,
//! longitude, field agent, last modified by, last modified date.

use fieldsync_import::models::{RawRow, Snapshot};
use std::path::{Path, PathBuf};

pub const REQUIRED_HEADERS: [&str; 8] = [
    "Property ID",
    "Drop Number",
    "Status",
    "Latitude",
    "Longitude",
    "Field Agent Name (Home Sign Ups)",
    "Last Modified Home Sign Ups By",
    "Last Modified Home Sign Ups Date",
];

/// One data row in `REQUIRED_HEADERS` order
pub fn data_row(row_number: usize, id: &str, drop: &str, status: &str, modified: &str) -> RawRow {
    RawRow::new(
        row_number,
        [id, drop, status, "-26.2041", "28.0473", "Thabo", "field.admin", modified]
            .iter()
            .map(|c| c.to_string())
            .collect(),
    )
}

pub fn snapshot(source_file: &str, rows: Vec<RawRow>) -> Snapshot {
    Snapshot {
        source_file: source_file.to_string(),
        headers: REQUIRED_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows,
    }
}

/// Write a CSV snapshot file and return its path
pub fn write_csv(dir: &Path, name: &str, headers: &[&str], rows: &[Vec<&str>]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(&path)
        .unwrap();
    writer.write_record(headers).unwrap();
    for row in rows {
        writer.write_record(row).unwrap();
    }
    writer.flush().unwrap();
    path
}

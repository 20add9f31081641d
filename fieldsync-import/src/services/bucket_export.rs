//! CSV export of batch-analysis buckets
//!
//! One file per bucket, headed with the export's own column headers so the
//! output opens next to the source snapshot without re-mapping.

use super::schema_mapper::MappingTable;
use crate::error::{ImportError, ImportResult};
use crate::models::{AnalysisBuckets, CanonicalField, CanonicalRecord};
use std::path::{Path, PathBuf};
use tracing::info;

pub const FIRST_ENTRY_FILE: &str = "first_entry.csv";
pub const PRE_WINDOW_DUPLICATES_FILE: &str = "pre_window_duplicates.csv";
pub const NO_DROP_ALLOCATED_FILE: &str = "no_drop_allocated.csv";
pub const DUPLICATE_DROPS_REMOVED_FILE: &str = "duplicate_drops_removed.csv";

/// Write all four buckets into `out_dir`; returns the written paths
pub fn export_buckets(
    buckets: &AnalysisBuckets,
    table: &MappingTable,
    out_dir: &Path,
) -> ImportResult<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;

    let files: [(&str, &[CanonicalRecord]); 4] = [
        (FIRST_ENTRY_FILE, &buckets.first_entry),
        (PRE_WINDOW_DUPLICATES_FILE, &buckets.pre_window_duplicate),
        (NO_DROP_ALLOCATED_FILE, &buckets.unallocated),
        (DUPLICATE_DROPS_REMOVED_FILE, &buckets.duplicate_removed),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, records) in files {
        let path = out_dir.join(name);
        write_records(&path, records, table)?;
        info!(file = %path.display(), rows = records.len(), "Bucket exported");
        written.push(path);
    }
    Ok(written)
}

/// Write records as CSV: source row number, every canonical field, quality score
pub fn write_records(path: &Path, records: &[CanonicalRecord], table: &MappingTable) -> ImportResult<()> {
    let export_err = |e: csv::Error| ImportError::Snapshot(format!("{}: {}", path.display(), e));
    let mut writer = csv::WriterBuilder::new().from_path(path).map_err(export_err)?;

    let mut header = vec!["Row".to_string()];
    header.extend(
        CanonicalField::ALL
            .iter()
            .map(|f| table.header_for(*f).unwrap_or(f.column_name()).to_string()),
    );
    header.push("Data Quality Score".to_string());
    writer.write_record(&header).map_err(export_err)?;

    for record in records {
        let mut row = vec![record.row_number.to_string()];
        row.extend(
            CanonicalField::ALL
                .iter()
                .map(|f| record.text(*f).unwrap_or_default()),
        );
        row.push(format!("{:.2}", record.quality_score));
        writer.write_record(&row).map_err(export_err)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(row: usize, drop: Option<&str>) -> CanonicalRecord {
        let mut fields = BTreeMap::new();
        fields.insert(CanonicalField::PropertyId, FieldValue::Integer(1000 + row as i64));
        fields.insert(CanonicalField::Status, FieldValue::Text("approved, signed".into()));
        if let Some(drop) = drop {
            fields.insert(CanonicalField::DropNumber, FieldValue::Text(drop.into()));
        }
        CanonicalRecord {
            source_file: "snap.csv".into(),
            natural_id: Some((1000 + row).to_string()),
            row_number: row,
            fields,
            extra: BTreeMap::new(),
            quality_score: 0.4,
            last_modified_at: None,
        }
    }

    #[test]
    fn test_export_writes_all_four_files() {
        let dir = TempDir::new().unwrap();
        let buckets = AnalysisBuckets {
            first_entry: vec![record(2, Some("DR1")), record(3, Some("DR2"))],
            unallocated: vec![record(4, None)],
            ..Default::default()
        };

        let paths = export_buckets(&buckets, &MappingTable::onemap_v1(), dir.path()).unwrap();
        assert_eq!(paths.len(), 4);
        assert!(paths.iter().all(|p| p.exists()));

        let mut reader = csv::Reader::from_path(dir.path().join(FIRST_ENTRY_FILE)).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "Row");
        assert_eq!(&headers[1], "Property ID");
        assert_eq!(&headers[headers.len() - 1], "Data Quality Score");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "2");
        assert_eq!(&rows[0][1], "1002");
        assert!(rows[0].iter().any(|cell| cell == "approved, signed"));
        assert_eq!(&rows[0][headers.len() - 1], "0.40");

        let empty = csv::Reader::from_path(dir.path().join(PRE_WINDOW_DUPLICATES_FILE))
            .unwrap()
            .records()
            .count();
        assert_eq!(empty, 0);
    }
}

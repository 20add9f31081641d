//! Snapshot file loading
//!
//! First worksheet of a workbook (`calamine`) or a delimited text file (`csv`).
//! Row 1 is the header row; all-blank data rows are skipped but keep their
//! spreadsheet numbering so reported row numbers match what the user sees.

use crate::error::{ImportError, ImportResult};
use crate::models::{RawRow, Snapshot};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::SecondsFormat;
use fieldsync_common::time::excel_serial_to_datetime;
use std::path::Path;
use tracing::{debug, info, warn};

/// Supported snapshot formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Workbook,
    Delimited(u8),
}

impl SnapshotFormat {
    pub fn for_path(path: &Path) -> ImportResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(SnapshotFormat::Workbook),
            "csv" => Ok(SnapshotFormat::Delimited(b',')),
            "tsv" => Ok(SnapshotFormat::Delimited(b'\t')),
            other => Err(ImportError::Snapshot(format!(
                "{}: unsupported file type '{}'",
                path.display(),
                other
            ))),
        }
    }
}

/// Load a snapshot file
pub fn load_snapshot(path: &Path) -> ImportResult<Snapshot> {
    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ImportError::Snapshot(format!("{}: not a file path", path.display())))?;

    let grid = match SnapshotFormat::for_path(path)? {
        SnapshotFormat::Workbook => read_workbook(path)?,
        SnapshotFormat::Delimited(delimiter) => read_delimited(path, delimiter)?,
    };

    let snapshot = snapshot_from_grid(source_file, grid);
    info!(
        file = %snapshot.source_file,
        columns = snapshot.headers.len(),
        rows = snapshot.rows.len(),
        "Snapshot loaded"
    );
    Ok(snapshot)
}

/// Grid of (spreadsheet row number, cells) in sheet order
type Grid = Vec<(usize, Vec<String>)>;

fn read_workbook(path: &Path) -> ImportResult<Grid> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ImportError::Snapshot(format!("{}: failed to open workbook: {}", path.display(), e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ImportError::Snapshot(format!("{}: workbook contains no sheets", path.display())))?;

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        ImportError::Snapshot(format!("{}: failed to read sheet '{}': {}", path.display(), sheet_name, e))
    })?;

    // The used range may not start at A1
    let (first_row, first_col) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));
    debug!(sheet = %sheet_name, first_row, first_col, "Reading worksheet");

    Ok(range
        .rows()
        .enumerate()
        .map(|(offset, row)| {
            let mut cells = vec![String::new(); first_col];
            cells.extend(row.iter().map(cell_text));
            (first_row + offset + 1, cells)
        })
        .collect())
}

/// Text form of a workbook cell
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::Error(e) => format!("#{:?}", e),
        // 1900 date system assumed
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(|at| at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

fn read_delimited(path: &Path, delimiter: u8) -> ImportResult<Grid> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ImportError::Snapshot(format!("{}: {}", path.display(), e)))?;

    let mut grid = Vec::new();
    for (index, result) in reader.byte_records().enumerate() {
        let record = result.map_err(|e| ImportError::Snapshot(format!("{}: {}", path.display(), e)))?;
        // Quoted cells may span lines, so number rows by the line they start on
        let row_number = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(index + 1);

        let mut cells = decode_cells(&record, row_number);
        if index == 0 {
            // Excel-exported CSVs often start with a byte order mark
            if let Some(first) = cells.first_mut() {
                *first = first.trim_start_matches('\u{feff}').to_string();
            }
        }
        grid.push((row_number, cells));
    }
    Ok(grid)
}

/// Cells as text; bytes that are not UTF-8 (Windows-1252 exports) become U+FFFD
fn decode_cells(record: &csv::ByteRecord, row_number: usize) -> Vec<String> {
    record
        .iter()
        .map(|bytes| match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => {
                warn!(row = row_number, "Cell is not valid UTF-8, invalid bytes replaced");
                String::from_utf8_lossy(bytes).into_owned()
            }
        })
        .collect()
}

fn snapshot_from_grid(source_file: String, grid: Grid) -> Snapshot {
    let mut rows = grid.into_iter();

    let mut headers = rows.next().map(|(_, cells)| cells).unwrap_or_default();
    while headers.last().is_some_and(|h| h.trim().is_empty()) {
        headers.pop();
    }

    let rows = rows
        .map(|(row_number, cells)| RawRow::new(row_number, cells))
        .filter(|row| !row.is_blank())
        .collect();

    Snapshot {
        source_file,
        headers,
        rows,
    }
}

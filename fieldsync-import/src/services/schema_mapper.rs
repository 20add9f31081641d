//! Header → canonical field mapping
//!
//! Resolution order per header:
//! 1. exact match against the versioned mapping table (plus configured aliases)
//! 2. case-insensitive substring match against a known header, for fields no
//!    other column has claimed yet (longest known header wins)
//! 3. generated slug name, kept as an extra column
//!
//! Steps 2 and 3 log a warning so schema drift shows up without stopping the run.

use crate::models::CanonicalField;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Fields a snapshot must provide before any batch is created
pub const REQUIRED_FIELDS: [CanonicalField; 8] = [
    CanonicalField::PropertyId,
    CanonicalField::DropNumber,
    CanonicalField::Status,
    CanonicalField::Latitude,
    CanonicalField::Longitude,
    CanonicalField::FieldAgentName,
    CanonicalField::LastModifiedBy,
    CanonicalField::LastModifiedDate,
];

/// Versioned table of known export headers
#[derive(Debug, Clone)]
pub struct MappingTable {
    version: &'static str,
    entries: Vec<(String, CanonicalField)>,
}

impl MappingTable {
    /// Field-installation export, first revision
    pub fn onemap_v1() -> Self {
        let entries = [
            ("Property ID", CanonicalField::PropertyId),
            ("1map NAD ID", CanonicalField::OneMapNadId),
            ("Pole Number", CanonicalField::PoleNumber),
            ("Drop Number", CanonicalField::DropNumber),
            ("Status", CanonicalField::Status),
            ("Flow Name Groups", CanonicalField::FlowNameGroups),
            ("Sections", CanonicalField::Sections),
            ("PONs", CanonicalField::Pons),
            ("Location", CanonicalField::Location),
            ("Location Address", CanonicalField::Address),
            ("Address", CanonicalField::Address),
            ("Latitude", CanonicalField::Latitude),
            ("GPS Lat", CanonicalField::Latitude),
            ("Longitude", CanonicalField::Longitude),
            ("GPS Lng", CanonicalField::Longitude),
            ("Field Agent Name (Home Sign Ups)", CanonicalField::FieldAgentName),
            ("Field Agent Name (pole permission)", CanonicalField::PolePermissionAgent),
            ("Last Modified Home Sign Ups By", CanonicalField::LastModifiedBy),
            ("Last Modified Home Sign Ups Date", CanonicalField::LastModifiedDate),
            ("Stand Number", CanonicalField::StandNumber),
            ("Contact Number (e.g.0123456789)", CanonicalField::ContactNumber),
        ];

        Self {
            version: "onemap-v1",
            entries: entries
                .iter()
                .map(|(header, field)| (header.to_string(), *field))
                .collect(),
        }
    }

    /// Layer extra exact-match entries over the table
    pub fn with_aliases(mut self, aliases: &BTreeMap<String, CanonicalField>) -> Self {
        for (header, field) in aliases {
            self.entries.push((header.trim().to_string(), *field));
        }
        self
    }

    pub fn version(&self) -> &str {
        self.version
    }

    /// First known export header for a field
    pub fn header_for(&self, field: CanonicalField) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, f)| *f == field)
            .map(|(header, _)| header.as_str())
    }

    fn exact(&self, header: &str) -> Option<CanonicalField> {
        self.entries
            .iter()
            .find(|(known, _)| known == header)
            .map(|(_, field)| *field)
    }

    /// Longest known header contained in `header` whose field is still free
    fn substring(&self, header: &str, claimed: &BTreeSet<CanonicalField>) -> Option<(&str, CanonicalField)> {
        let lowered = header.to_lowercase();
        self.entries
            .iter()
            .filter(|(_, field)| !claimed.contains(field))
            .filter(|(known, _)| contains_phrase(&lowered, &known.to_lowercase()))
            .max_by_key(|(known, _)| known.len())
            .map(|(known, field)| (known.as_str(), *field))
    }
}

/// `needle` occurs in `haystack` delimited by non-alphanumerics or the ends
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric());
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

/// Where a column's values go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnTarget {
    Canonical(CanonicalField),
    /// Unmapped column, stored under its generated name
    Extra(String),
}

/// How a header was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact,
    Substring,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub header: String,
    pub target: ColumnTarget,
    pub resolution: Resolution,
}

/// Mapping for one snapshot's header row, by column index
#[derive(Debug, Clone, Default)]
pub struct SchemaMapping {
    pub columns: Vec<ColumnMapping>,
    /// Drift warnings (substring and generated resolutions)
    pub warnings: Vec<String>,
}

impl SchemaMapping {
    pub fn target(&self, index: usize) -> Option<&ColumnTarget> {
        self.columns.get(index).map(|c| &c.target)
    }

    pub fn mapped_fields(&self) -> BTreeSet<CanonicalField> {
        self.columns
            .iter()
            .filter_map(|c| match c.target {
                ColumnTarget::Canonical(field) => Some(field),
                ColumnTarget::Extra(_) => None,
            })
            .collect()
    }

    /// Required fields no column resolved to, in declaration order
    pub fn missing_required(&self) -> Vec<CanonicalField> {
        let mapped = self.mapped_fields();
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !mapped.contains(field))
            .collect()
    }
}

/// Maps raw headers onto canonical fields
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    table: MappingTable,
}

impl SchemaMapper {
    pub fn new(table: MappingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Resolve every header; never fails
    pub fn map_headers(&self, headers: &[String]) -> SchemaMapping {
        let trimmed: Vec<&str> = headers.iter().map(|h| h.trim()).collect();

        // Exact matches claim their fields before any substring match runs
        let exact: Vec<Option<CanonicalField>> =
            trimmed.iter().map(|h| self.table.exact(h)).collect();
        let mut claimed: BTreeSet<CanonicalField> = exact.iter().flatten().copied().collect();

        let mut mapping = SchemaMapping::default();
        for (index, header) in trimmed.iter().enumerate() {
            let (target, resolution) = if let Some(field) = exact[index] {
                (ColumnTarget::Canonical(field), Resolution::Exact)
            } else if let Some((known, field)) = self.table.substring(header, &claimed) {
                claimed.insert(field);
                let message = format!(
                    "Column \"{}\" matched known header \"{}\" by substring, mapped to {}",
                    header, known, field
                );
                warn!(table = self.table.version(), "{}", message);
                mapping.warnings.push(message);
                (ColumnTarget::Canonical(field), Resolution::Substring)
            } else {
                let name = match slugify(header) {
                    slug if slug.is_empty() => format!("column_{}", index + 1),
                    slug => slug,
                };
                let message = format!("Column \"{}\" not in mapping, using: {}", header, name);
                warn!(table = self.table.version(), "{}", message);
                mapping.warnings.push(message);
                (ColumnTarget::Extra(name), Resolution::Generated)
            };

            mapping.columns.push(ColumnMapping {
                header: header.to_string(),
                target,
                resolution,
            });
        }

        mapping
    }
}

impl Default for SchemaMapper {
    fn default() -> Self {
        Self::new(MappingTable::onemap_v1())
    }
}

/// Lower-case, non-alphanumeric runs collapsed to `_`, outer `_` trimmed
pub fn slugify(header: &str) -> String {
    let mut slug = String::with_capacity(header.len());
    let mut pending_sep = false;
    for ch in header.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch);
        } else {
            pending_sep = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Pole Permission: Date"), "pole_permission_date");
        assert_eq!(slugify("  --Weird__Header!!  "), "weird_header");
        assert_eq!(slugify("Contact Number (e.g.0123456789)"), "contact_number_e_g_0123456789");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn test_exact_headers_map_without_warnings() {
        let mapper = SchemaMapper::default();
        let mapping = mapper.map_headers(&headers(&["Property ID", " Status ", "GPS Lat"]));

        assert_eq!(mapping.target(0), Some(&ColumnTarget::Canonical(CanonicalField::PropertyId)));
        assert_eq!(mapping.target(1), Some(&ColumnTarget::Canonical(CanonicalField::Status)));
        assert_eq!(mapping.target(2), Some(&ColumnTarget::Canonical(CanonicalField::Latitude)));
        assert!(mapping.warnings.is_empty());
    }

    #[test]
    fn test_unknown_header_gets_slug_and_warning() {
        let mapper = SchemaMapper::default();
        let mapping = mapper.map_headers(&headers(&["Pole Permission: Date", "", "Property ID"]));

        assert_eq!(
            mapping.target(0),
            Some(&ColumnTarget::Extra("pole_permission_date".into()))
        );
        assert_eq!(mapping.target(1), Some(&ColumnTarget::Extra("column_2".into())));
        assert_eq!(mapping.columns[0].resolution, Resolution::Generated);
        assert_eq!(mapping.warnings.len(), 2);
    }

    #[test]
    fn test_substring_fallback_only_claims_free_fields() {
        let mapper = SchemaMapper::default();
        let mapping = mapper.map_headers(&headers(&[
            "Status",
            "Pole Status (legacy)",
            "Drop Number / Unit",
        ]));

        // Status already claimed exactly, so the legacy column stays extra
        assert_eq!(
            mapping.target(1),
            Some(&ColumnTarget::Extra("pole_status_legacy".into()))
        );
        assert_eq!(
            mapping.target(2),
            Some(&ColumnTarget::Canonical(CanonicalField::DropNumber))
        );
        assert_eq!(mapping.columns[2].resolution, Resolution::Substring);
    }

    #[test]
    fn test_substring_prefers_longest_known_header() {
        let mapper = SchemaMapper::default();
        let mapping = mapper.map_headers(&headers(&["Old Location Address"]));
        // "Location Address" beats "Location" and "Address"
        assert_eq!(
            mapping.target(0),
            Some(&ColumnTarget::Canonical(CanonicalField::Address))
        );
    }

    #[test]
    fn test_substring_requires_word_boundaries() {
        let mapper = SchemaMapper::default();
        let mapping = mapper.map_headers(&headers(&["Responses", "Total PONs"]));
        assert_eq!(mapping.target(0), Some(&ColumnTarget::Extra("responses".into())));
        assert_eq!(mapping.target(1), Some(&ColumnTarget::Canonical(CanonicalField::Pons)));
    }

    #[test]
    fn test_missing_required_fields_reported_in_order() {
        let mapper = SchemaMapper::default();
        let mapping = mapper.map_headers(&headers(&["Property ID", "Status", "Latitude", "Longitude"]));
        assert_eq!(
            mapping.missing_required(),
            vec![
                CanonicalField::DropNumber,
                CanonicalField::FieldAgentName,
                CanonicalField::LastModifiedBy,
                CanonicalField::LastModifiedDate,
            ]
        );
    }

    #[test]
    fn test_aliases_extend_table() {
        let mut aliases = BTreeMap::new();
        aliases.insert("Drop No".to_string(), CanonicalField::DropNumber);
        let mapper = SchemaMapper::new(MappingTable::onemap_v1().with_aliases(&aliases));

        let mapping = mapper.map_headers(&headers(&["Drop No"]));
        assert_eq!(mapping.columns[0].resolution, Resolution::Exact);
        assert_eq!(mapper.table().version(), "onemap-v1");
    }
}

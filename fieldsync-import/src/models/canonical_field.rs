//! Canonical field enumeration
//!
//! Every known column of the installation export, tagged with the kind of
//! normalization it receives. Column names double as the store's column names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalization applied to a field's raw text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Integer-valued identifier (kept as text if it doesn't parse)
    Identifier,
    /// Integer quantity (kept as text if it doesn't parse)
    Numeric,
    /// Floating point coordinate (kept as text if it doesn't parse)
    Coordinate,
    /// Timestamp, normalized to RFC 3339 when recognized
    Date,
    /// Free text, trimmed
    Text,
}

/// Canonical installation-record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    PropertyId,
    OneMapNadId,
    PoleNumber,
    DropNumber,
    Status,
    FlowNameGroups,
    Sections,
    Pons,
    Location,
    Address,
    Latitude,
    Longitude,
    FieldAgentName,
    PolePermissionAgent,
    LastModifiedBy,
    LastModifiedDate,
    StandNumber,
    ContactNumber,
}

impl CanonicalField {
    /// All fields, in store column order
    pub const ALL: [CanonicalField; 18] = [
        CanonicalField::PropertyId,
        CanonicalField::OneMapNadId,
        CanonicalField::PoleNumber,
        CanonicalField::DropNumber,
        CanonicalField::Status,
        CanonicalField::FlowNameGroups,
        CanonicalField::Sections,
        CanonicalField::Pons,
        CanonicalField::Location,
        CanonicalField::Address,
        CanonicalField::Latitude,
        CanonicalField::Longitude,
        CanonicalField::FieldAgentName,
        CanonicalField::PolePermissionAgent,
        CanonicalField::LastModifiedBy,
        CanonicalField::LastModifiedDate,
        CanonicalField::StandNumber,
        CanonicalField::ContactNumber,
    ];

    /// Column name in `installation_records` (and in exports)
    pub fn column_name(self) -> &'static str {
        match self {
            CanonicalField::PropertyId => "property_id",
            CanonicalField::OneMapNadId => "one_map_nad_id",
            CanonicalField::PoleNumber => "pole_number",
            CanonicalField::DropNumber => "drop_number",
            CanonicalField::Status => "status",
            CanonicalField::FlowNameGroups => "flow_name_groups",
            CanonicalField::Sections => "sections",
            CanonicalField::Pons => "pons",
            CanonicalField::Location => "location",
            CanonicalField::Address => "address",
            CanonicalField::Latitude => "latitude",
            CanonicalField::Longitude => "longitude",
            CanonicalField::FieldAgentName => "field_agent_name",
            CanonicalField::PolePermissionAgent => "pole_permission_agent",
            CanonicalField::LastModifiedBy => "last_modified_by",
            CanonicalField::LastModifiedDate => "last_modified_date",
            CanonicalField::StandNumber => "stand_number",
            CanonicalField::ContactNumber => "contact_number",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            CanonicalField::PropertyId | CanonicalField::OneMapNadId => FieldKind::Identifier,
            CanonicalField::Sections | CanonicalField::Pons | CanonicalField::StandNumber => {
                FieldKind::Numeric
            }
            CanonicalField::Latitude | CanonicalField::Longitude => FieldKind::Coordinate,
            CanonicalField::LastModifiedDate => FieldKind::Date,
            // Phone numbers keep their leading zero
            CanonicalField::ContactNumber => FieldKind::Text,
            _ => FieldKind::Text,
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        CanonicalField::ALL
            .iter()
            .copied()
            .find(|field| field.column_name() == wanted)
            .ok_or_else(|| format!("unknown canonical field: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names_round_trip_through_from_str() {
        for field in CanonicalField::ALL {
            assert_eq!(field.column_name().parse::<CanonicalField>(), Ok(field));
        }
        assert!("not_a_field".parse::<CanonicalField>().is_err());
    }

    #[test]
    fn test_serde_name_matches_column_name() {
        let json = serde_json::to_string(&CanonicalField::OneMapNadId).unwrap();
        assert_eq!(json, "\"one_map_nad_id\"");
        let json = serde_json::to_string(&CanonicalField::FieldAgentName).unwrap();
        assert_eq!(json, "\"field_agent_name\"");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(CanonicalField::PropertyId.kind(), FieldKind::Identifier);
        assert_eq!(CanonicalField::Pons.kind(), FieldKind::Numeric);
        assert_eq!(CanonicalField::Longitude.kind(), FieldKind::Coordinate);
        assert_eq!(CanonicalField::LastModifiedDate.kind(), FieldKind::Date);
        assert_eq!(CanonicalField::DropNumber.kind(), FieldKind::Text);
        assert_eq!(CanonicalField::ContactNumber.kind(), FieldKind::Text);
    }
}

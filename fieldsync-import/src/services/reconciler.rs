//! Insert-vs-update reconciliation with field-level change detection
//!
//! Runs inside the caller's row savepoint. On the update path every tracked
//! field transition is appended to the ledger before the record is
//! overwritten, so the ledger always holds the before/after pair.

use super::row_normalizer::NATURAL_ID_FIELD;
use crate::config::ImportConfig;
use crate::db::{change_ledger, records};
use crate::error::RowError;
use crate::models::{
    CanonicalField, CanonicalRecord, ChangeEvent, ChangeType, EntityType, FieldKind,
};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

/// What reconciling one record did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created { record_id: i64 },
    Updated {
        record_id: i64,
        changes: usize,
        status_changed: bool,
    },
}

/// One detected tracked-field transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: CanonicalField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    tracked_fields: Vec<CanonicalField>,
    default_create_status: String,
}

impl ReconciliationEngine {
    pub fn new(tracked_fields: Vec<CanonicalField>, default_create_status: impl Into<String>) -> Self {
        Self {
            tracked_fields,
            default_create_status: default_create_status.into(),
        }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(config.tracked_fields.clone(), config.default_create_status.clone())
    }

    /// Create or update the record keyed by `(source_file, natural_id)`
    pub async fn reconcile(
        &self,
        conn: &mut SqliteConnection,
        record: &CanonicalRecord,
        batch_id: Uuid,
    ) -> Result<ReconcileOutcome, RowError> {
        let row = record.row_number;
        let natural_id = record.natural_id.as_deref().ok_or(RowError::MissingNaturalId {
            row,
            field: NATURAL_ID_FIELD,
        })?;
        let persist = |source: sqlx::Error| RowError::Persistence { row, source };

        let existing = records::find_by_natural_key(
            &mut *conn,
            &record.source_file,
            natural_id,
            &self.tracked_fields,
        )
        .await
        .map_err(persist)?;

        let now = Utc::now();
        let entity_type = entity_type_for(record);

        match existing {
            Some(existing) => {
                let changes = detect_changes(&self.tracked_fields, &existing.values, record);
                for change in &changes {
                    let event = ChangeEvent {
                        entity_type,
                        entity_id: natural_id.to_string(),
                        field_name: change.field.column_name().to_string(),
                        old_value: change.old_value.clone(),
                        new_value: change.new_value.clone(),
                        source_file: record.source_file.clone(),
                        batch_id,
                        change_type: ChangeType::Update,
                        recorded_at: now,
                    };
                    change_ledger::append_event(&mut *conn, &event, existing.id)
                        .await
                        .map_err(persist)?;
                    debug!(
                        row,
                        field = %change.field,
                        old = ?change.old_value,
                        new = ?change.new_value,
                        "Tracked field changed"
                    );
                }

                records::update_record(&mut *conn, existing.id, record, batch_id, now)
                    .await
                    .map_err(persist)?;

                Ok(ReconcileOutcome::Updated {
                    record_id: existing.id,
                    changes: changes.len(),
                    status_changed: changes.iter().any(|c| c.field == CanonicalField::Status),
                })
            }
            None => {
                let record_id = records::insert_record(&mut *conn, record, natural_id, batch_id, now)
                    .await
                    .map_err(persist)?;

                let event = ChangeEvent {
                    entity_type,
                    entity_id: natural_id.to_string(),
                    field_name: CanonicalField::Status.column_name().to_string(),
                    old_value: None,
                    new_value: Some(
                        record
                            .status()
                            .unwrap_or_else(|| self.default_create_status.clone()),
                    ),
                    source_file: record.source_file.clone(),
                    batch_id,
                    change_type: ChangeType::Create,
                    recorded_at: now,
                };
                change_ledger::append_event(&mut *conn, &event, record_id)
                    .await
                    .map_err(persist)?;

                Ok(ReconcileOutcome::Created { record_id })
            }
        }
    }
}

/// Pole when the record carries a pole number, otherwise the property
pub fn entity_type_for(record: &CanonicalRecord) -> EntityType {
    if record.text(CanonicalField::PoleNumber).is_some() {
        EntityType::Pole
    } else {
        EntityType::Property
    }
}

/// Tracked-field differences between stored text values and an incoming record
///
/// A field counts as changed when the values differ and at least one side is
/// non-empty. Coordinates compare numerically (the store renders `28.0`, the
/// record `28`).
pub fn detect_changes(
    tracked: &[CanonicalField],
    stored: &std::collections::BTreeMap<CanonicalField, Option<String>>,
    incoming: &CanonicalRecord,
) -> Vec<FieldChange> {
    tracked
        .iter()
        .filter_map(|field| {
            let old_value = stored
                .get(field)
                .cloned()
                .flatten()
                .filter(|v| !v.trim().is_empty());
            let new_value = incoming.text(*field);

            if old_value.is_none() && new_value.is_none() {
                return None;
            }
            if values_equal(field.kind(), old_value.as_deref(), new_value.as_deref()) {
                return None;
            }
            Some(FieldChange {
                field: *field,
                old_value,
                new_value,
            })
        })
        .collect()
}

fn values_equal(kind: FieldKind, old: Option<&str>, new: Option<&str>) -> bool {
    match (old, new) {
        (Some(a), Some(b)) if kind == FieldKind::Coordinate => {
            match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                (Ok(x), Ok(y)) => x == y,
                _ => a.trim() == b.trim(),
            }
        }
        (Some(a), Some(b)) => a.trim() == b.trim(),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use std::collections::BTreeMap;

    fn incoming(values: &[(CanonicalField, FieldValue)]) -> CanonicalRecord {
        CanonicalRecord {
            source_file: "snap.xlsx".into(),
            natural_id: Some("1001".into()),
            row_number: 2,
            fields: values.iter().cloned().collect(),
            extra: BTreeMap::new(),
            quality_score: 0.0,
            last_modified_at: None,
        }
    }

    fn stored(values: &[(CanonicalField, Option<&str>)]) -> BTreeMap<CanonicalField, Option<String>> {
        values
            .iter()
            .map(|(f, v)| (*f, v.map(String::from)))
            .collect()
    }

    #[test]
    fn test_status_transition_detected() {
        let tracked = [CanonicalField::Status, CanonicalField::DropNumber];
        let changes = detect_changes(
            &tracked,
            &stored(&[(CanonicalField::Status, Some("pending")), (CanonicalField::DropNumber, Some("DR1"))]),
            &incoming(&[
                (CanonicalField::Status, FieldValue::Text("approved".into())),
                (CanonicalField::DropNumber, FieldValue::Text("DR1".into())),
            ]),
        );

        assert_eq!(
            changes,
            vec![FieldChange {
                field: CanonicalField::Status,
                old_value: Some("pending".into()),
                new_value: Some("approved".into()),
            }]
        );
    }

    #[test]
    fn test_multiple_fields_and_cleared_values() {
        let tracked = [CanonicalField::Status, CanonicalField::FieldAgentName, CanonicalField::DropNumber];
        let changes = detect_changes(
            &tracked,
            &stored(&[
                (CanonicalField::Status, Some("pending")),
                (CanonicalField::FieldAgentName, Some("Thabo")),
                (CanonicalField::DropNumber, None),
            ]),
            &incoming(&[
                (CanonicalField::Status, FieldValue::Text("approved".into())),
                (CanonicalField::DropNumber, FieldValue::Text("DR7".into())),
            ]),
        );

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[1].field, CanonicalField::FieldAgentName);
        assert_eq!(changes[1].new_value, None);
        assert_eq!(changes[2].old_value, None);
    }

    #[test]
    fn test_both_empty_is_not_a_change() {
        let tracked = [CanonicalField::Status];
        let changes = detect_changes(
            &tracked,
            &stored(&[(CanonicalField::Status, Some(""))]),
            &incoming(&[(CanonicalField::Status, FieldValue::Null)]),
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_coordinates_compare_numerically() {
        let tracked = [CanonicalField::Longitude];
        let changes = detect_changes(
            &tracked,
            &stored(&[(CanonicalField::Longitude, Some("28.0"))]),
            &incoming(&[(CanonicalField::Longitude, FieldValue::Float(28.0))]),
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_untracked_fields_ignored() {
        let tracked = [CanonicalField::Status];
        let changes = detect_changes(
            &tracked,
            &stored(&[(CanonicalField::Status, Some("pending"))]),
            &incoming(&[
                (CanonicalField::Status, FieldValue::Text("pending".into())),
                (CanonicalField::Address, FieldValue::Text("moved".into())),
            ]),
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_entity_type() {
        let property = incoming(&[]);
        assert_eq!(entity_type_for(&property), EntityType::Property);
        let pole = incoming(&[(CanonicalField::PoleNumber, FieldValue::Text("LAW.P.A001".into()))]);
        assert_eq!(entity_type_for(&pole), EntityType::Pole);
    }
}

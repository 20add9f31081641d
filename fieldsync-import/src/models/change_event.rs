//! Change ledger events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ChangeType::Create),
            "update" => Some(ChangeType::Update),
            _ => None,
        }
    }
}

/// Entity a record describes: a pole when it carries a pole number, otherwise
/// the property itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Pole,
    Property,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Pole => "pole",
            EntityType::Property => "property",
        }
    }
}

/// Immutable field transition; appended once, never edited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub source_file: String,
    pub batch_id: Uuid,
    pub change_type: ChangeType,
    pub recorded_at: DateTime<Utc>,
}

/// Ledger row as read back from the store
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub record_id: i64,
    #[serde(flatten)]
    pub event: ChangeEvent,
}

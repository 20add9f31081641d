//! Import pipeline configuration
//!
//! Resolution: built-in defaults, overlaid by the `[import]` table of the
//! bootstrap TOML, overlaid by command-line flags. The resolved struct is
//! passed into `BatchCoordinator::new`; nothing reads configuration later.

use crate::error::{ImportError, ImportResult};
use crate::models::CanonicalField;
use fieldsync_common::config::TomlConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CREATE_STATUS: &str = "created";
pub const DEFAULT_MAX_RECORDED_ROW_ERRORS: usize = 100;
pub const DEFAULT_LOCK_WAIT_MS: u64 = 5000;

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Rows per chunk transaction
    pub batch_size: usize,

    /// Fields whose transitions are written to the change ledger
    pub tracked_fields: Vec<CanonicalField>,

    /// Ledger `new_value` for a created record without a status
    pub default_create_status: String,

    /// Row failures kept on the batch row (the error count is not capped)
    pub max_recorded_row_errors: usize,

    /// Maximum time to retry batch-table writes on `database is locked`
    pub lock_wait_ms: u64,

    /// Extra exact-match header → field entries layered over the mapping table
    pub column_aliases: BTreeMap<String, CanonicalField>,

    /// Where post-batch reports go (no reports when unset)
    pub report_dir: Option<PathBuf>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tracked_fields: vec![
                CanonicalField::Status,
                CanonicalField::FieldAgentName,
                CanonicalField::DropNumber,
            ],
            default_create_status: DEFAULT_CREATE_STATUS.to_string(),
            max_recorded_row_errors: DEFAULT_MAX_RECORDED_ROW_ERRORS,
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
            column_aliases: BTreeMap::new(),
            report_dir: None,
        }
    }
}

impl ImportConfig {
    /// Build from the bootstrap TOML's `[import]` table (defaults when absent)
    pub fn from_toml(toml_config: &TomlConfig) -> ImportResult<Self> {
        let config = match &toml_config.import {
            Some(table) => table
                .clone()
                .try_into::<ImportConfig>()
                .map_err(|e| ImportError::Config(format!("[import]: {}", e)))?,
            None => ImportConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn with_overrides(
        mut self,
        batch_size: Option<usize>,
        report_dir: Option<PathBuf>,
    ) -> ImportResult<Self> {
        if let Some(size) = batch_size {
            info!("Batch size overridden from command line: {}", size);
            self.batch_size = size;
        }
        if report_dir.is_some() {
            self.report_dir = report_dir;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ImportResult<()> {
        if self.batch_size == 0 {
            return Err(ImportError::Config("batch_size must be at least 1".into()));
        }
        if self.tracked_fields.is_empty() {
            return Err(ImportError::Config("tracked_fields must not be empty".into()));
        }
        if self.default_create_status.trim().is_empty() {
            return Err(ImportError::Config(
                "default_create_status must not be blank".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_common::config::parse_toml_config;

    #[test]
    fn test_defaults_without_import_table() {
        let config = ImportConfig::from_toml(&TomlConfig::default()).unwrap();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(
            config.tracked_fields,
            vec![
                CanonicalField::Status,
                CanonicalField::FieldAgentName,
                CanonicalField::DropNumber
            ]
        );
        assert_eq!(config.default_create_status, "created");
        assert!(config.report_dir.is_none());
    }

    #[test]
    fn test_import_table_overrides_defaults() {
        let toml_config = parse_toml_config(
            r#"
            [import]
            batch_size = 250
            tracked_fields = ["status", "pole_number"]
            report_dir = "/var/reports"

            [import.column_aliases]
            "Drop No" = "drop_number"
            "#,
        )
        .unwrap();

        let config = ImportConfig::from_toml(&toml_config).unwrap();
        assert_eq!(config.batch_size, 250);
        assert_eq!(
            config.tracked_fields,
            vec![CanonicalField::Status, CanonicalField::PoleNumber]
        );
        assert_eq!(
            config.column_aliases.get("Drop No"),
            Some(&CanonicalField::DropNumber)
        );
        assert_eq!(config.report_dir, Some(PathBuf::from("/var/reports")));
        // Untouched keys keep their defaults
        assert_eq!(config.lock_wait_ms, DEFAULT_LOCK_WAIT_MS);
    }

    #[test]
    fn test_unknown_field_names_are_rejected() {
        let toml_config = parse_toml_config(
            r#"
            [import]
            tracked_fields = ["colour"]
            "#,
        )
        .unwrap();
        assert!(matches!(
            ImportConfig::from_toml(&toml_config),
            Err(ImportError::Config(_))
        ));
    }

    #[test]
    fn test_cli_overrides_and_validation() {
        let config = ImportConfig::default()
            .with_overrides(Some(50), Some(PathBuf::from("out")))
            .unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.report_dir, Some(PathBuf::from("out")));

        assert!(ImportConfig::default().with_overrides(Some(0), None).is_err());
    }
}

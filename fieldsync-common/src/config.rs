//! Configuration loading and root folder resolution
//!
//! Bootstrap settings come from a TOML file; everything the pipeline itself needs
//! is carried in the `[import]` table and interpreted by the importer crate.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FIELDSYNC_CONFIG";

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "FIELDSYNC_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "fieldsync.db";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and reports
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database path (overrides `<root_folder>/fieldsync.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Raw `[import]` table, interpreted by the importer
    #[serde(default)]
    pub import: Option<toml::Value>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    parse_toml_config(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Parse TOML config text
pub fn parse_toml_config(content: &str) -> std::result::Result<TomlConfig, toml::de::Error> {
    toml::from_str(content)
}

/// Locate the config file
///
/// Priority:
/// 1. Explicit path (command line)
/// 2. `FIELDSYNC_CONFIG` environment variable
/// 3. `~/.config/fieldsync/config.toml`
/// 4. `/etc/fieldsync/config.toml` (Linux only)
///
/// An explicit path that does not exist is an error; the implicit locations are
/// simply skipped.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = cli_arg {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(Error::Config(format!("Config file not found: {}", path.display())));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(Error::Config(format!(
            "{} points at missing file: {}",
            CONFIG_ENV_VAR,
            path.display()
        )));
    }

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("fieldsync").join("config.toml")) {
        if user_config.exists() {
            return Ok(Some(user_config));
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fieldsync/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }
    }

    debug!("No config file found, using built-in defaults");
    Ok(None)
}

/// Root folder resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(root) = &toml_config.root_folder {
        return root.clone();
    }

    default_root_folder()
}

/// Resolve the database path: explicit CLI path, then TOML, then `<root>/fieldsync.db`
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    toml_config: &TomlConfig,
    root_folder: &Path,
) -> PathBuf {
    cli_arg
        .map(Path::to_path_buf)
        .or_else(|| toml_config.database_path.clone())
        .unwrap_or_else(|| root_folder.join(DATABASE_FILE_NAME))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fieldsync"))
        .unwrap_or_else(|| PathBuf::from("./fieldsync_data"))
}

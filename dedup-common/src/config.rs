//! Bootstrap configuration and database location resolution
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap**: database path, root folder, logging (static, read at startup)
//! 2. **Database runtime**: everything else lives in the `settings` table
//!
//! Database path resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file (`database_path`, or `root_folder` joined with [`DATABASE_FILE_NAME`])
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name of the SQLite database inside a root folder
pub const DATABASE_FILE_NAME: &str = "dedup.db";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (relative or absolute)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Root folder holding the database when `database_path` is absent
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
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

/// Load bootstrap configuration from a TOML file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
}

/// Load the platform config file if one exists
///
/// Looks for `<config_dir>/dedup/config.toml` (e.g. `~/.config/dedup/config.toml`
/// on Linux). A missing file is not an error and yields the defaults.
pub fn load_default_toml_config() -> Result<TomlConfig> {
    match dirs::config_dir().map(|d| d.join("dedup").join("config.toml")) {
        Some(path) if path.exists() => load_toml_config(&path),
        _ => Ok(TomlConfig::default()),
    }
}

/// Resolve the database path following the priority order in the module docs
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml.database_path {
        return path.clone();
    }
    if let Some(root) = &toml.root_folder {
        return root.join(DATABASE_FILE_NAME);
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder().join(DATABASE_FILE_NAME)
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/dedup (or /var/lib/dedup for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("dedup"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/dedup"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("dedup"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/dedup"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("dedup"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\dedup"))
    } else {
        PathBuf::from("./dedup_data")
    }
}

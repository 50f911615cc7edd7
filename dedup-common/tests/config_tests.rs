//! Tests for bootstrap configuration loading and database path resolution
//!
//! Tests that manipulate DEDUP_TEST_DATABASE are marked with #[serial] so they
//! never race on the process environment.

use dedup_common::config::{
    load_toml_config, resolve_database_path, LoggingConfig, TomlConfig, DATABASE_FILE_NAME,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ENV_VAR: &str = "DEDUP_TEST_DATABASE";

#[test]
fn test_logging_defaults_to_info() {
    assert_eq!(LoggingConfig::default().level, "info");
    assert_eq!(TomlConfig::default().logging.level, "info");
}

#[test]
fn test_load_toml_with_all_fields() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("dedup.toml");
    std::fs::write(
        &path,
        r#"
database_path = "/data/dedup.db"
root_folder = "/data"

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.database_path, Some(PathBuf::from("/data/dedup.db")));
    assert_eq!(config.root_folder, Some(PathBuf::from("/data")));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_load_toml_missing_sections_use_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("dedup.toml");
    std::fs::write(&path, "root_folder = \"/srv/dedup\"\n").unwrap();

    let config = load_toml_config(&path).unwrap();
    assert!(config.database_path.is_none());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_load_invalid_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("dedup.toml");
    std::fs::write(&path, "database_path = [").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(matches!(err, dedup_common::Error::Config(_)), "got {:?}", err);
}

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ENV_VAR, "/from/env.db");
    let toml = TomlConfig {
        database_path: Some(PathBuf::from("/from/toml.db")),
        ..TomlConfig::default()
    };

    let path = resolve_database_path(Some(Path::new("/from/cli.db")), ENV_VAR, &toml);
    assert_eq!(path, PathBuf::from("/from/cli.db"));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(ENV_VAR, "/from/env.db");
    let toml = TomlConfig {
        database_path: Some(PathBuf::from("/from/toml.db")),
        ..TomlConfig::default()
    };

    let path = resolve_database_path(None, ENV_VAR, &toml);
    assert_eq!(path, PathBuf::from("/from/env.db"));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_toml_root_folder_joins_database_name() {
    env::remove_var(ENV_VAR);
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/dedup")),
        ..TomlConfig::default()
    };

    let path = resolve_database_path(None, ENV_VAR, &toml);
    assert_eq!(path, PathBuf::from("/srv/dedup").join(DATABASE_FILE_NAME));
}

#[test]
#[serial]
fn test_default_path_ends_with_database_name() {
    env::remove_var(ENV_VAR);
    let path = resolve_database_path(None, ENV_VAR, &TomlConfig::default());
    assert!(path.ends_with(DATABASE_FILE_NAME));
}

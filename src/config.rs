//! User configuration, read from `~/.taxrecords/config.json`.
//!
//! Every key is optional. A missing file means defaults; a file that exists
//! but does not parse is an error so typos are not silently ignored.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::db::DbError;

/// Directory under the home directory used when `dataDir` is not set.
pub const DEFAULT_DIR_NAME: &str = ".taxrecords";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Holds the database and the `imports/` archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Role names granted administrator access.
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,
    /// Role names allowed to edit records and run imports.
    #[serde(default = "default_editor_roles")]
    pub editor_roles: Vec<String>,
    /// How many row errors an import summary lists before collapsing the rest.
    #[serde(default = "default_error_summary_limit")]
    pub error_summary_limit: usize,
    /// Window for the "recently created" dashboard counter.
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: i64,
    /// Archived upload files older than this are pruned.
    #[serde(default = "default_archive_retention_days")]
    pub archive_retention_days: u32,
}

fn default_admin_roles() -> Vec<String> {
    vec!["admin".to_string()]
}

fn default_editor_roles() -> Vec<String> {
    vec!["editor".to_string()]
}

fn default_error_summary_limit() -> usize {
    5
}

fn default_recent_window_days() -> i64 {
    7
}

fn default_archive_retention_days() -> u32 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            admin_roles: default_admin_roles(),
            editor_roles: default_editor_roles(),
            error_summary_limit: default_error_summary_limit(),
            recent_window_days: default_recent_window_days(),
            archive_retention_days: default_archive_retention_days(),
        }
    }
}

impl Config {
    /// Resolve the data directory, falling back to `~/.taxrecords`.
    pub fn data_dir(&self) -> Result<PathBuf, DbError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
                Ok(home.join(DEFAULT_DIR_NAME))
            }
        }
    }

    /// Where uploaded import files are archived.
    pub fn archive_dir(&self) -> Result<PathBuf, DbError> {
        Ok(self.data_dir()?.join("imports"))
    }
}

/// Default config location: `~/.taxrecords/config.json`.
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(DEFAULT_DIR_NAME).join("config.json"))
}

/// Load the config from the default location.
pub fn load_config() -> Result<Config, String> {
    load_config_from(&config_path()?)
}

/// Load the config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    if config.error_summary_limit == 0 {
        return Err("errorSummaryLimit must be at least 1".to_string());
    }
    if config.recent_window_days < 0 {
        return Err("recentWindowDays must not be negative".to_string());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.error_summary_limit, 5);
        assert_eq!(config.recent_window_days, 7);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "dataDir": "/srv/taxrecords", "editorRoles": ["editor", "contador"] }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/taxrecords")));
        assert_eq!(config.editor_roles, vec!["editor", "contador"]);
        assert_eq!(config.admin_roles, vec!["admin"]);
        assert_eq!(
            config.archive_dir().unwrap(),
            PathBuf::from("/srv/taxrecords/imports")
        );
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ dataDir: ").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"), "{}", err);
    }

    #[test]
    fn test_zero_summary_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "errorSummaryLimit": 0 }"#).unwrap();
        assert!(load_config_from(&path).is_err());
    }
}

//! Core configuration loaded from a JSON document.
//!
//! # Responsibility
//! - Describe database/logging locations and migration tuning knobs.
//! - Validate values once at load time so services can trust them.
//!
//! # Invariants
//! - Missing fields fall back to defaults; unknown fields are rejected.
//! - `old_task_threshold_days` is at least 1.
//! - `log_level` is one of `trace|debug|info|warn|error`.

use crate::logging::normalize_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const DEFAULT_OLD_TASK_THRESHOLD_DAYS: u32 = 5;
const DEFAULT_DB_FILE_NAME: &str = "bujo.sqlite3";

/// Tuning knobs for the migration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationSettings {
    /// Whole days a pending task may sit before it is flagged for review.
    pub old_task_threshold_days: u32,
    /// Run month-end archival after each successful daily migration.
    pub archive_enabled: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            old_task_threshold_days: DEFAULT_OLD_TASK_THRESHOLD_DAYS,
            archive_enabled: true,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute directory for rolling log files; `None` disables file logging.
    pub log_dir: Option<PathBuf>,
    pub migration: MigrationSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            migration: MigrationSettings::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config document: {err}"),
            Self::Invalid(message) => write!(f, "invalid config value: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl CoreConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("db_path cannot be empty".to_string()));
        }
        normalize_level(&self.log_level).map_err(ConfigError::Invalid)?;
        if let Some(log_dir) = self.log_dir.as_ref() {
            if !log_dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    log_dir.display()
                )));
            }
        }
        if self.migration.old_task_threshold_days == 0 {
            return Err(ConfigError::Invalid(
                "migration.old_task_threshold_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

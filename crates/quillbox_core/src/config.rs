//! Backup engine configuration.
//!
//! # Responsibility
//! - Hold every tunable of the backup engine with working defaults.
//! - Load settings from a JSON file and from `QUILLBOX_*` environment
//!   variables.
//!
//! # Invariants
//! - A config that passed `validate()` has non-zero timers and keeps at least
//!   one historical snapshot.

use crate::remote::http::{DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE};
use crate::remote::rotation::MAX_BACKUPS;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_FOLDER_NAME: &str = "quillbox-backups";
pub const DEFAULT_DEBOUNCE_MS: u64 = 30_000;
pub const DEFAULT_PERIODIC_INTERVAL_MS: u64 = 5 * 60_000;
pub const DEFAULT_SUCCESS_RESET_MS: u64 = 3_000;

const ENV_PREFIX: &str = "QUILLBOX_";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    InvalidValue { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "failed to read config `{}`: {message}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "invalid config `{}`: {message}", path.display())
            }
            Self::InvalidValue { key, message } => write!(f, "invalid `{key}`: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Settings for one backup session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Remote folder holding every backup object.
    pub folder_name: String,
    /// Account the backups belong to; copied into metadata.
    pub owner_identity: String,
    /// Historical snapshots kept after rotation.
    pub max_backups: usize,
    /// Quiet period after the latest mutation before a backup runs.
    pub debounce_ms: u64,
    /// Safety-net backup interval.
    pub periodic_interval_ms: u64,
    /// How long `success` stays visible before reverting to `idle`.
    pub success_reset_ms: u64,
    /// Superseded local-only database, if this device may still have one.
    pub legacy_db_path: Option<PathBuf>,
    pub api_base_url: String,
    pub upload_base_url: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            folder_name: DEFAULT_FOLDER_NAME.to_string(),
            owner_identity: String::new(),
            max_backups: MAX_BACKUPS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            periodic_interval_ms: DEFAULT_PERIODIC_INTERVAL_MS,
            success_reset_ms: DEFAULT_SUCCESS_RESET_MS,
            legacy_db_path: None,
            api_base_url: DEFAULT_API_BASE.to_string(),
            upload_base_url: DEFAULT_UPLOAD_BASE.to_string(),
        }
    }
}

impl BackupConfig {
    /// Reads a JSON config file; absent keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Applies `QUILLBOX_*`-style overrides from `lookup` (key without prefix).
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("FOLDER_NAME") {
            self.folder_name = value;
        }
        if let Some(value) = lookup("OWNER") {
            self.owner_identity = value;
        }
        if let Some(value) = lookup("MAX_BACKUPS") {
            self.max_backups = parse_number("max_backups", &value)? as usize;
        }
        if let Some(value) = lookup("DEBOUNCE_MS") {
            self.debounce_ms = parse_number("debounce_ms", &value)?;
        }
        if let Some(value) = lookup("PERIODIC_INTERVAL_MS") {
            self.periodic_interval_ms = parse_number("periodic_interval_ms", &value)?;
        }
        if let Some(value) = lookup("SUCCESS_RESET_MS") {
            self.success_reset_ms = parse_number("success_reset_ms", &value)?;
        }
        if let Some(value) = lookup("LEGACY_DB") {
            self.legacy_db_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("API_BASE_URL") {
            self.api_base_url = value;
        }
        if let Some(value) = lookup("UPLOAD_BASE_URL") {
            self.upload_base_url = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.folder_name.trim().is_empty() {
            return Err(invalid("folder_name", "cannot be empty"));
        }
        if self.max_backups == 0 {
            return Err(invalid("max_backups", "must keep at least one backup"));
        }
        for (key, value) in [
            ("debounce_ms", self.debounce_ms),
            ("periodic_interval_ms", self.periodic_interval_ms),
            ("success_reset_ms", self.success_reset_ms),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_interval_ms)
    }

    pub fn success_reset(&self) -> Duration {
        Duration::from_millis(self.success_reset_ms)
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| invalid(key, &format!("`{value}` is not a number: {err}")))
}

fn invalid(key: &'static str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{BackupConfig, ConfigError};
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn defaults_match_reference_timings() {
        let config = BackupConfig::default();
        assert_eq!(config.debounce(), Duration::from_secs(30));
        assert_eq!(config.periodic_interval(), Duration::from_secs(300));
        assert_eq!(config.max_backups, 3);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"owner_identity":"writer@example.com","debounce_ms":500}}"#).unwrap();
        let config = BackupConfig::load(file.path()).unwrap();
        assert_eq!(config.owner_identity, "writer@example.com");
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.folder_name, "quillbox-backups");
    }

    #[test]
    fn overrides_are_parsed_and_validated() {
        let env: HashMap<&str, &str> = HashMap::from([("MAX_BACKUPS", "5"), ("OWNER", "a@b.c")]);
        let config = BackupConfig::default()
            .with_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(config.max_backups, 5);
        assert_eq!(config.owner_identity, "a@b.c");

        let err = BackupConfig::default()
            .with_overrides(|key| (key == "DEBOUNCE_MS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "debounce_ms", .. }));
    }
}

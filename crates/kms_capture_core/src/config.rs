//! Engine configuration.
//!
//! # Responsibility
//! - Parse the vault/capture sections of the YAML config file.
//! - Apply defaults, `~` expansion and the `KMS_VAULT_PATH` override.
//!
//! # Invariants
//! - Configuration is resolved once; the engine never re-reads it per call.
//! - Unknown sections are ignored so one file can serve several tools.

use crate::store::backup::{BackupPolicy, DEFAULT_BACKUP_MAX_AGE_DAYS, DEFAULT_BACKUP_RETENTION};
use crate::store::conflict::DEFAULT_MAX_NAME_ATTEMPTS;
use crate::vault::VaultLayout;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub const VAULT_PATH_ENV: &str = "KMS_VAULT_PATH";
pub const DEFAULT_VAULT_PATH: &str = "~/notes";
pub const DEFAULT_CAPTURE_DIR: &str = "capture/raw_capture";
pub const DEFAULT_MEDIA_DIR: &str = "capture/raw_capture/media";

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: io::Error },
    Parse(serde_yaml::Error),
    Invalid { field: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config yaml: {err}"),
            Self::Invalid { field, reason } => write!(f, "invalid config value `{field}`: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupConfig {
    pub retention: usize,
    /// `0` disables age pruning.
    pub max_age_days: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_BACKUP_RETENTION,
            max_age_days: DEFAULT_BACKUP_MAX_AGE_DAYS,
        }
    }
}

/// Resolved engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub vault_path: PathBuf,
    /// Relative to `vault_path`.
    pub capture_dir: String,
    /// Relative to `vault_path`.
    pub media_dir: String,
    pub dedup_media: bool,
    pub max_name_attempts: u32,
    pub backup: BackupConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vault_path: expand_home(DEFAULT_VAULT_PATH),
            capture_dir: DEFAULT_CAPTURE_DIR.to_string(),
            media_dir: DEFAULT_MEDIA_DIR.to_string(),
            dedup_media: true,
            max_name_attempts: DEFAULT_MAX_NAME_ATTEMPTS,
            backup: BackupConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    vault: Option<VaultSection>,
    capture: Option<CaptureSection>,
}

#[derive(Debug, Default, Deserialize)]
struct VaultSection {
    path: Option<String>,
    capture_dir: Option<String>,
    media_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CaptureSection {
    dedup_media: Option<bool>,
    max_name_attempts: Option<u32>,
    backup: Option<BackupSection>,
}

#[derive(Debug, Default, Deserialize)]
struct BackupSection {
    retention: Option<usize>,
    max_age_days: Option<u64>,
}

impl EngineConfig {
    /// Defaults rooted at `vault_path`.
    pub fn for_vault(vault_path: impl Into<PathBuf>) -> Self {
        Self {
            vault_path: vault_path.into(),
            ..Self::default()
        }
    }

    /// Parses a YAML document; missing or empty values fall back to defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = if text.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str::<Option<ConfigFile>>(text)?.unwrap_or_default()
        };

        let mut config = Self::default();
        let vault = file.vault.unwrap_or_default();
        if let Some(path) = non_blank(vault.path) {
            config.vault_path = expand_home(&path);
        }
        if let Some(capture_dir) = non_blank(vault.capture_dir) {
            config.capture_dir = capture_dir;
        }
        if let Some(media_dir) = non_blank(vault.media_dir) {
            config.media_dir = media_dir;
        }

        let capture = file.capture.unwrap_or_default();
        if let Some(dedup) = capture.dedup_media {
            config.dedup_media = dedup;
        }
        if let Some(attempts) = capture.max_name_attempts {
            config.max_name_attempts = attempts;
        }
        let backup = capture.backup.unwrap_or_default();
        if let Some(retention) = backup.retention {
            config.backup.retention = retention;
        }
        if let Some(max_age_days) = backup.max_age_days {
            config.backup.max_age_days = max_age_days;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads and parses the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Applies `KMS_VAULT_PATH` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = non_blank(lookup(VAULT_PATH_ENV)) {
            self.vault_path = expand_home(&path);
        }
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_name_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "capture.max_name_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        self.layout().map(|_| ()).map_err(|err| ConfigError::Invalid {
            field: "vault",
            reason: err.to_string(),
        })
    }

    pub fn layout(&self) -> Result<VaultLayout, crate::vault::VaultPathError> {
        VaultLayout::new(&self.vault_path, &self.capture_dir, &self.media_dir)
    }

    pub fn backup_policy(&self) -> BackupPolicy {
        BackupPolicy::with_max_age_days(self.backup.retention, self.backup.max_age_days)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Expands a leading `~` to the home directory when one is known.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

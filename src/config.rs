//! Configuration management for backupg.
use regex::Regex;
use serde::Deserialize;
use serde::de::Error as _;
use std::{env, fs, path::Path, slice};

use crate::error::BackupManagerError;

/// Represents the structure of the configuration file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Configuration version.
    pub version: String,
    /// Path of the append-only backup journal.
    pub log_file: String,
    /// Path to the mount daemon binary.
    pub mount_binary: String,
    /// Path to the mount daemon's own configuration file.
    pub mount_config: String,
    /// Directory the backup volume is mounted on. This is not a directory
    /// being backed up, but the destination the sync tool writes into.
    pub backup_dir: String,
    /// Hours to sleep between full passes over the targets.
    pub interval_hours: u64,
    /// Sync tool invoked to mirror sources into the mounted volume.
    #[serde(default = "default_sync_binary")]
    pub sync_binary: String,
    /// Ordered list of backup targets.
    pub backups: Vec<BackupTarget>,
}

fn default_sync_binary() -> String {
    "rsync".to_string()
}

/// One configured backup target. Immutable once read from configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct BackupTarget {
    /// Volume identifier on the mount daemon side.
    pub volume: String,
    /// Source path(s) handed to the sync tool.
    pub path: OneOrMany<String>,
    /// Optional exclude pattern(s).
    pub exclude: Option<OneOrMany<String>>,
    /// Pass `--one-file-system` to the sync tool.
    #[serde(default)]
    pub one_file_system: bool,
    /// Skip this target entirely.
    #[serde(default)]
    pub disabled: bool,
    /// Extra flags appended to the sync command line.
    pub extra_sync_flags: Option<Vec<String>>,
    /// Per-target override of the sync tool binary.
    pub sync_binary: Option<String>,
}

/// A value that may be written as a single entry or an ordered sequence.
///
/// Any other YAML shape (a map, a nested list) fails at parse time, so the
/// cycle never has to re-check it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A bare scalar.
    One(T),
    /// An ordered sequence.
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Iterates the contained values in order.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        match self {
            OneOrMany::One(value) => slice::from_ref(value).iter(),
            OneOrMany::Many(values) => values.iter(),
        }
    }

    /// Number of contained values.
    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(values) => values.len(),
        }
    }

    /// Whether the sequence form is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Expands `$VAR` / `${VAR}` references within the raw configuration text.
fn expand_env_vars(input: &str) -> Result<String, BackupManagerError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static regex");

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    if let Some(var_name) = missing {
        return Err(config_error(format!(
            "Missing environment variable: {var_name}"
        )));
    }

    Ok(result.to_string())
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(config_path: &str) -> Result<Config, BackupManagerError> {
    let path = Path::new(config_path);
    let content = fs::read_to_string(path).map_err(|e| {
        BackupManagerError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let config: Config =
        serde_yaml::from_str(&expanded).map_err(BackupManagerError::ConfigParseError)?;

    validate(config)
}

/// Load-time sanity checks that serde's shape checking cannot express.
fn validate(config: Config) -> Result<Config, BackupManagerError> {
    if config.interval_hours == 0 {
        return Err(config_error("interval_hours must be greater than 0"));
    }

    if config.backup_dir.trim().is_empty() {
        return Err(config_error("backup_dir must not be empty"));
    }

    Ok(config)
}

/// Helper for constructing a configuration parse error wrapped in our domain
/// error type.
fn config_error(message: impl Into<String>) -> BackupManagerError {
    BackupManagerError::ConfigParseError(serde_yaml::Error::custom(message.into()))
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use strongbox_core::RetryPolicy;
use strongbox_storage::{legacy::DEFAULT_CONFIG_URI, EncryptionSettings};

/// User-level configuration loaded from `~/.config/strongbox/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Override for the properties database.
    pub database_path: Option<PathBuf>,
    /// Database holding legacy single-value tables, if any.
    pub legacy_database_path: Option<PathBuf>,
    /// OS keyring service holding the master keys.
    pub keyring_service: String,
    /// Master key alias used for new key records.
    pub default_key_alias: String,
    /// Container that receives migrated legacy values.
    pub migration_uri: String,
    pub retry: RetryPolicy,
    pub encryption: EncryptionSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            legacy_database_path: None,
            keyring_service: "strongbox".to_string(),
            default_key_alias: "master".to_string(),
            migration_uri: DEFAULT_CONFIG_URI.to_string(),
            retry: RetryPolicy::default(),
            encryption: EncryptionSettings::default(),
        }
    }
}

/// Load config from `path`, or from the default path when none is given.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_from_path(path),
        None => load_from_path(default_path()?),
    }
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("strongbox").join("config.toml"))
}

/// Write `config` to `path` unless a file is already there, so user edits
/// are never clobbered.
pub fn write_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

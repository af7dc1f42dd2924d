use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use strongbox_core::StoreOptions;
use strongbox_crypto::{KeyringProvider, MasterKeyProvider, SoftwareKeyStore};
use strongbox_storage::{
    EncryptedPropertiesFactory, MiscStorage, MiscStoragePropertiesFactory, SqliteMiscStorage,
    UriMapping,
};
use tracing::debug;

/// Resolve the default data directory for Strongbox.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("strongbox"))
}

pub fn database_path(config: &Config) -> Result<PathBuf> {
    match &config.database_path {
        Some(path) => Ok(path.clone()),
        None => Ok(default_data_dir()?.join("properties.db")),
    }
}

/// Build the encrypted factory backed by the OS keychain.
pub fn factory_from_config(config: &Config) -> Result<EncryptedPropertiesFactory> {
    let path = database_path(config)?;
    debug!(path = %path.display(), "initializing encrypted properties");
    Ok(factory_with_provider(
        config,
        path,
        KeyringProvider::new(config.keyring_service.clone()),
    ))
}

pub fn factory_with_provider(
    config: &Config,
    database: impl Into<PathBuf>,
    provider: impl MasterKeyProvider + 'static,
) -> EncryptedPropertiesFactory {
    let options = StoreOptions::new(config.retry.clone());
    let storage = Arc::new(SqliteMiscStorage::new(database));
    let adapter = MiscStoragePropertiesFactory::new(storage, UriMapping::default().shared())
        .with_options(options.clone());
    let keys = SoftwareKeyStore::new(provider).with_default_alias(config.default_key_alias.clone());
    EncryptedPropertiesFactory::new(Arc::new(adapter), Arc::new(keys))
        .with_settings(config.encryption)
        .with_options(options)
}

/// Opens the legacy database, or returns `None` when there is nothing to import.
pub fn legacy_tables(path: &Path) -> Result<Option<Arc<SqliteMiscStorage>>> {
    if !path.exists() {
        debug!(path = %path.display(), "no legacy database");
        return Ok(None);
    }
    let storage = SqliteMiscStorage::new(path);
    storage.open()?;
    Ok(Some(Arc::new(storage)))
}

/// Helper for tests: a factory over `root` keyed by an in-memory provider.
#[cfg(test)]
pub fn test_factory(root: &Path) -> EncryptedPropertiesFactory {
    factory_with_provider(
        &Config::default(),
        root.join("properties.db"),
        strongbox_crypto::InMemoryKeyProvider::default(),
    )
}

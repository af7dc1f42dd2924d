//! String-only key-value backing stores addressed by component and table.

mod memory;
pub(crate) mod sqlite;

use std::collections::HashMap;

use thiserror::Error;

pub use memory::InMemoryMiscStorage;
pub use sqlite::SqliteMiscStorage;

/// Errors produced by backing stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MiscStorageError {
    #[error("database is not open")]
    NotOpen,
    #[error("database does not exist")]
    DatabaseMissing,
    #[error("database already exists")]
    DatabaseExists,
    #[error("invalid name: {name:?}")]
    InvalidName { name: String },
    #[error("table {component}/{table} does not exist")]
    TableMissing { component: String, table: String },
    #[error("table {component}/{table} already exists")]
    TableExists { component: String, table: String },
    #[error("table {component}/{table} is not empty")]
    TableNotEmpty { component: String, table: String },
    /// Lock contention; the call may succeed if repeated.
    #[error("database busy: {0}")]
    Busy(String),
    #[error("database error: {0}")]
    Database(String),
}

impl MiscStorageError {
    /// Whether repeating the call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MiscStorageError::Busy(_))
    }
}

/// Backing store holding string values in per-component tables.
///
/// `open` fails with [`MiscStorageError::DatabaseMissing`] when there is no
/// database yet; callers then fall back to `create_database`.
pub trait MiscStorage: Send + Sync {
    fn create_database(&self) -> Result<(), MiscStorageError>;

    fn open(&self) -> Result<(), MiscStorageError>;

    fn is_opened(&self) -> bool;

    /// Creates a table with string keys and string values.
    fn create_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError>;

    fn table_exists(&self, component: &str, table: &str) -> Result<bool, MiscStorageError>;

    fn get(
        &self,
        component: &str,
        table: &str,
        key: &str,
    ) -> Result<Option<String>, MiscStorageError>;

    /// Inserts or overwrites `key`.
    fn put(
        &self,
        component: &str,
        table: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MiscStorageError>;

    /// Removes `key`; removing an absent key succeeds.
    fn remove(&self, component: &str, table: &str, key: &str) -> Result<(), MiscStorageError>;

    fn load(
        &self,
        component: &str,
        table: &str,
    ) -> Result<HashMap<String, String>, MiscStorageError>;

    fn clear_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError>;

    /// Drops an empty table.
    fn delete_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError>;
}

pub(crate) fn check_name(name: &str) -> Result<(), MiscStorageError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(MiscStorageError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn check_names(component: &str, table: &str) -> Result<(), MiscStorageError> {
    check_name(component)?;
    check_name(table)
}

pub(crate) fn table_missing(component: &str, table: &str) -> MiscStorageError {
    MiscStorageError::TableMissing {
        component: component.to_string(),
        table: table.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_busy_is_transient() {
        assert!(MiscStorageError::Busy("locked".into()).is_transient());
        assert!(!MiscStorageError::NotOpen.is_transient());
        assert!(!MiscStorageError::Database("io".into()).is_transient());
    }

    #[test]
    fn names_are_restricted_to_identifier_characters() {
        assert!(check_names("component", "config").is_ok());
        assert!(check_names("lwa-auth", "token_2").is_ok());
        assert!(check_names("", "config").is_err());
        assert!(check_names("component", "drop table").is_err());
        assert!(check_names("a\"b", "c").is_err());
    }
}

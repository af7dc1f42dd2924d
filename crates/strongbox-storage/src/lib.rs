//! Property storage backends: string-only backing stores, the adapter that
//! turns them into byte-valued containers, the encrypting layer on top and
//! the importer for legacy single-value tables.

pub mod adapter;
pub mod encrypted;
pub mod legacy;
pub mod misc_storage;
pub mod uri;

pub use adapter::{AdapterState, MiscStorageProperties, MiscStoragePropertiesFactory};
pub use encrypted::{
    EncryptedProperties, EncryptedPropertiesFactory, EncryptionSettings, RESERVED_KEY,
};
pub use legacy::{
    LegacyEntry, LegacyMigration, LegacyTableStore, MigrationError, MigrationOutcome,
    MigrationReport,
};
pub use misc_storage::{InMemoryMiscStorage, MiscStorage, MiscStorageError, SqliteMiscStorage};
pub use uri::{UriMapper, UriMapping};

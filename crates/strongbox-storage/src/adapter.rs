//! Properties containers over a string-only [`MiscStorage`].
//!
//! Each container maps its config URI onto one backing table. Byte values are
//! stored as base64 text; string values are stored verbatim. Every backing
//! call runs through a per-call [`RetryExecutor`], so transient failures are
//! retried and the installed error callback gets a say on everything else.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use strongbox_core::{
    Abort, Action, AttemptError, OperationType, Properties, PropertiesError, PropertiesFactory,
    RetryExecutor, StoreOptions,
};
use tracing::{debug, error, instrument, warn};

use crate::{
    misc_storage::{MiscStorage, MiscStorageError},
    uri::UriMapper,
};

/// Accepts missing or extra padding and non-zero trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

pub fn encode_value(value: &[u8]) -> String {
    general_purpose::STANDARD.encode(value)
}

/// Decodes a stored value, ignoring surrounding whitespace and trailing NUL
/// characters left behind by C-string round trips.
pub fn decode_value(encoded: &str) -> Result<Vec<u8>, String> {
    let trimmed = encoded
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .trim_start();
    LENIENT.decode(trimmed).map_err(|e| format!("base64 decode failed: {e}"))
}

/// Lifecycle of a container's backing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// The database has not been confirmed open.
    Closed,
    /// The database is open; the table may not exist yet.
    Open,
    /// The table exists and accepts data calls.
    Ready,
}

fn attempt(err: MiscStorageError) -> AttemptError {
    let transient = err.is_transient();
    let error = PropertiesError::storage(err);
    if transient {
        AttemptError::retryable(error)
    } else {
        AttemptError::fatal(error)
    }
}

fn lock_err<E: std::fmt::Display>(err: E) -> PropertiesError {
    PropertiesError::InnerStorage {
        reason: format!("lock poisoned: {err}"),
    }
}

/// One container backed by a `(component, table)` pair.
pub struct MiscStorageProperties {
    storage: Arc<dyn MiscStorage>,
    config_uri: String,
    component: String,
    table: String,
    options: StoreOptions,
    state: Mutex<AdapterState>,
}

impl MiscStorageProperties {
    pub fn new(
        storage: Arc<dyn MiscStorage>,
        config_uri: impl Into<String>,
        component: impl Into<String>,
        table: impl Into<String>,
        options: StoreOptions,
    ) -> Self {
        Self {
            storage,
            config_uri: config_uri.into(),
            component: component.into(),
            table: table.into(),
            options,
            state: Mutex::new(AdapterState::Closed),
        }
    }

    pub fn config_uri(&self) -> &str {
        &self.config_uri
    }

    pub fn state(&self) -> AdapterState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(AdapterState::Closed)
    }

    /// Opens (or creates) the database and creates the table if needed.
    #[instrument(skip_all, fields(config_uri = %self.config_uri))]
    pub fn ensure_ready(&self) -> Result<(), PropertiesError> {
        let mut executor = RetryExecutor::new(OperationType::Open, &self.config_uri, &self.options);
        self.ready_with(&mut executor)
    }

    fn ready_with(&self, executor: &mut RetryExecutor<'_>) -> Result<(), PropertiesError> {
        let mut state = self.state.lock().map_err(lock_err)?;
        if *state == AdapterState::Closed {
            executor
                .execute("openDatabase", "", Action::Retry, || self.open_or_create())
                .map_err(|abort| abort.error)?;
            *state = AdapterState::Open;
            debug!(config_uri = %self.config_uri, "database open");
        }
        if *state == AdapterState::Open {
            let exists = executor
                .execute("tableExists", "", Action::Retry, || {
                    self.storage
                        .table_exists(&self.component, &self.table)
                        .map_err(attempt)
                })
                .map_err(|abort| abort.error)?;
            if !exists {
                executor
                    .execute("createTable", "", Action::Retry, || {
                        self.storage
                            .create_table(&self.component, &self.table)
                            .map_err(attempt)
                    })
                    .map_err(|abort| abort.error)?;
                debug!(config_uri = %self.config_uri, "table created");
            }
            *state = AdapterState::Ready;
        }
        Ok(())
    }

    fn open_or_create(&self) -> Result<(), AttemptError> {
        if self.storage.is_opened() {
            return Ok(());
        }
        match self.storage.open() {
            Ok(()) => Ok(()),
            Err(err) if err.is_transient() => Err(attempt(err)),
            Err(err) => {
                debug!(config_uri = %self.config_uri, %err, "open failed, creating database");
                self.storage.create_database().map_err(attempt)
            }
        }
    }

    /// Runs a per-key step. When the callback asks for cleanup the key is
    /// deleted and the original failure is still returned.
    fn key_action<T>(
        &self,
        executor: &mut RetryExecutor<'_>,
        name: &str,
        key: &str,
        can_cleanup: bool,
        op: impl FnMut() -> Result<T, AttemptError>,
    ) -> Result<T, PropertiesError> {
        match executor.execute(name, key, Action::Retry, op) {
            Ok(value) => Ok(value),
            Err(Abort {
                error,
                cleanup: true,
            }) if can_cleanup => {
                match self.delete_value(executor, key) {
                    Ok(()) => warn!(config_uri = %self.config_uri, key, name, "value dropped"),
                    Err(err) => {
                        error!(config_uri = %self.config_uri, key, name, %err, "cleanup failed")
                    }
                }
                Err(error)
            }
            Err(abort) => Err(abort.error),
        }
    }

    fn delete_value(
        &self,
        executor: &mut RetryExecutor<'_>,
        key: &str,
    ) -> Result<(), PropertiesError> {
        executor
            .execute("deleteValue", key, Action::Retry, || {
                self.storage
                    .remove(&self.component, &self.table, key)
                    .map_err(attempt)
            })
            .map_err(|abort| abort.error)
    }

    fn load_raw(&self, operation: OperationType, key: &str) -> Result<String, PropertiesError> {
        let mut executor = RetryExecutor::new(operation, &self.config_uri, &self.options);
        self.ready_with(&mut executor)?;
        self.key_action(&mut executor, "getValue", key, true, || {
            self.storage
                .get(&self.component, &self.table, key)
                .map_err(attempt)
        })?
        .ok_or_else(|| PropertiesError::NotFound {
            key: key.to_string(),
        })
    }

    fn store_raw(&self, key: &str, value: &str) -> Result<(), PropertiesError> {
        let mut executor = RetryExecutor::new(OperationType::Put, &self.config_uri, &self.options);
        self.ready_with(&mut executor)?;
        self.key_action(&mut executor, "putValue", key, true, || {
            self.storage
                .put(&self.component, &self.table, key, value)
                .map_err(attempt)
        })
    }
}

impl Properties for MiscStorageProperties {
    #[instrument(skip_all, fields(config_uri = %self.config_uri, key))]
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, PropertiesError> {
        let mut executor = RetryExecutor::new(OperationType::Get, &self.config_uri, &self.options);
        self.ready_with(&mut executor)?;
        let encoded = self
            .key_action(&mut executor, "getBytes", key, true, || {
                self.storage
                    .get(&self.component, &self.table, key)
                    .map_err(attempt)
            })?
            .ok_or_else(|| PropertiesError::NotFound {
                key: key.to_string(),
            })?;

        let value = self.key_action(&mut executor, "decodeBytes", key, true, || {
            decode_value(&encoded)
                .map_err(|reason| AttemptError::fatal(PropertiesError::Unknown { reason }))
        })?;
        debug!("get bytes succeeded");
        Ok(value)
    }

    #[instrument(skip_all, fields(config_uri = %self.config_uri, key))]
    fn put_bytes(&self, key: &str, value: &[u8]) -> Result<(), PropertiesError> {
        self.store_raw(key, &encode_value(value))?;
        debug!("put bytes succeeded");
        Ok(())
    }

    #[instrument(skip_all, fields(config_uri = %self.config_uri, key))]
    fn get_string(&self, key: &str) -> Result<String, PropertiesError> {
        self.load_raw(OperationType::Get, key)
    }

    #[instrument(skip_all, fields(config_uri = %self.config_uri, key))]
    fn put_string(&self, key: &str, value: &str) -> Result<(), PropertiesError> {
        self.store_raw(key, value)
    }

    #[instrument(skip_all, fields(config_uri = %self.config_uri, key))]
    fn remove(&self, key: &str) -> Result<(), PropertiesError> {
        let mut executor = RetryExecutor::new(OperationType::Put, &self.config_uri, &self.options);
        self.ready_with(&mut executor)?;
        self.delete_value(&mut executor, key)
    }

    #[instrument(skip_all, fields(config_uri = %self.config_uri))]
    fn keys(&self) -> Result<HashSet<String>, PropertiesError> {
        let mut executor = RetryExecutor::new(OperationType::Get, &self.config_uri, &self.options);
        self.ready_with(&mut executor)?;
        let values = executor
            .execute("loadKeys", "", Action::Retry, || {
                self.storage
                    .load(&self.component, &self.table)
                    .map_err(attempt)
            })
            .map_err(|abort| abort.error)?;
        Ok(values.into_keys().collect())
    }

    #[instrument(skip_all, fields(config_uri = %self.config_uri))]
    fn clear(&self) -> Result<(), PropertiesError> {
        let mut executor = RetryExecutor::new(OperationType::Put, &self.config_uri, &self.options);
        self.ready_with(&mut executor)?;
        executor
            .execute("clearTable", "", Action::Retry, || {
                self.storage
                    .clear_table(&self.component, &self.table)
                    .map_err(attempt)
            })
            .map_err(|abort| abort.error)?;
        debug!("container cleared");
        Ok(())
    }
}

/// Hands out one [`MiscStorageProperties`] per config URI.
pub struct MiscStoragePropertiesFactory {
    storage: Arc<dyn MiscStorage>,
    mapper: Arc<dyn UriMapper>,
    options: StoreOptions,
    containers: Mutex<HashMap<String, Arc<MiscStorageProperties>>>,
}

impl MiscStoragePropertiesFactory {
    pub fn new(storage: Arc<dyn MiscStorage>, mapper: Arc<dyn UriMapper>) -> Self {
        Self {
            storage,
            mapper,
            options: StoreOptions::default(),
            containers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn storage(&self) -> &Arc<dyn MiscStorage> {
        &self.storage
    }

    /// Like [`PropertiesFactory::properties`] but returns the concrete type.
    /// The backing table is not touched until the first data call.
    #[instrument(skip_all, fields(config_uri))]
    pub fn container(&self, config_uri: &str) -> Result<Arc<MiscStorageProperties>, PropertiesError> {
        let (component, table) =
            self.mapper
                .extract(config_uri)
                .ok_or_else(|| PropertiesError::Unknown {
                    reason: format!("config uri cannot be mapped: {config_uri}"),
                })?;

        let container = {
            let mut containers = self.containers.lock().map_err(lock_err)?;
            Arc::clone(containers.entry(config_uri.to_string()).or_insert_with(|| {
                Arc::new(MiscStorageProperties::new(
                    Arc::clone(&self.storage),
                    config_uri,
                    component,
                    table,
                    self.options.clone(),
                ))
            }))
        };
        Ok(container)
    }
}

impl PropertiesFactory for MiscStoragePropertiesFactory {
    fn properties(&self, config_uri: &str) -> Result<Arc<dyn Properties>, PropertiesError> {
        let container: Arc<dyn Properties> = self.container(config_uri)?;
        Ok(container)
    }
}

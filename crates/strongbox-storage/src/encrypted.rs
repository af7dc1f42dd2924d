//! Transparent encryption over any [`Properties`] container.
//!
//! Each container owns a random data key. The key is wrapped by the key
//! store's master key (with the config URI as associated data) and persisted
//! under [`RESERVED_KEY`] in the inner container. Values are sealed with the
//! data key, using the property key as associated data, and stored as
//! digest-protected [`DataRecord`]s.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use strongbox_core::{
    Abort, Action, AttemptError, OperationType, Properties, PropertiesError, PropertiesFactory,
    RetryExecutor, StoreOptions,
};
use strongbox_crypto::{
    aead::{self, generate_iv, generate_key},
    codec::{DataRecord, EncryptionKeyRecord},
    AlgorithmType, CodecError, CryptoError, DigestType, KeyStore, KeyStoreError,
};
use tracing::{debug, error, instrument, warn};
use zeroize::Zeroizing;

/// Property key holding the wrapped data key. Clients cannot use it.
pub const RESERVED_KEY: &str = "$acsdkEncryption$";

/// Algorithms used for new key records and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionSettings {
    /// Cipher for property values; also sizes the data key.
    pub data_algorithm: AlgorithmType,
    /// Cipher the master key uses to wrap the data key.
    pub key_algorithm: AlgorithmType,
    pub digest: DigestType,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            data_algorithm: AlgorithmType::Aes256Gcm,
            key_algorithm: AlgorithmType::Aes256Gcm,
            digest: DigestType::Sha256,
        }
    }
}

#[derive(Clone)]
struct DataKey {
    algorithm: AlgorithmType,
    key: Zeroizing<Vec<u8>>,
}

fn hsm(err: KeyStoreError) -> PropertiesError {
    PropertiesError::Hsm {
        reason: err.to_string(),
    }
}

fn crypto(err: CryptoError) -> PropertiesError {
    PropertiesError::Crypto {
        reason: err.to_string(),
    }
}

/// Structural damage counts as a digest failure; an unknown layout does not.
fn codec(key: &str, err: CodecError) -> PropertiesError {
    match err {
        CodecError::UnsupportedVersion(_) => PropertiesError::Unknown {
            reason: err.to_string(),
        },
        _ => PropertiesError::Digest {
            key: key.to_string(),
        },
    }
}

/// Inner container failures may be retried on request; a missing key may not.
fn inner(err: PropertiesError) -> AttemptError {
    match err {
        PropertiesError::NotFound { .. } => AttemptError::fatal(err),
        _ => AttemptError::retryable(err),
    }
}

fn reject_reserved(key: &str) -> Result<(), PropertiesError> {
    if key == RESERVED_KEY {
        return Err(PropertiesError::ReservedKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// A container whose values are encrypted before they reach `inner`.
pub struct EncryptedProperties {
    config_uri: String,
    inner: Arc<dyn Properties>,
    key_store: Arc<dyn KeyStore>,
    settings: EncryptionSettings,
    options: StoreOptions,
    data_key: Mutex<Option<DataKey>>,
}

impl EncryptedProperties {
    pub fn new(
        config_uri: impl Into<String>,
        inner: Arc<dyn Properties>,
        key_store: Arc<dyn KeyStore>,
        settings: EncryptionSettings,
        options: StoreOptions,
    ) -> Self {
        Self {
            config_uri: config_uri.into(),
            inner,
            key_store,
            settings,
            options,
            data_key: Mutex::new(None),
        }
    }

    pub fn config_uri(&self) -> &str {
        &self.config_uri
    }

    /// Loads the data key, creating the key record on first use.
    pub fn ensure_data_key(&self) -> Result<(), PropertiesError> {
        self.data_key(true).map(|_| ())
    }

    fn slot(&self) -> Result<MutexGuard<'_, Option<DataKey>>, PropertiesError> {
        self.data_key.lock().map_err(|err| PropertiesError::Unknown {
            reason: format!("lock poisoned: {err}"),
        })
    }

    /// Returns the data key, loading it on first use. An empty container only
    /// gets a key record when `create` is set.
    #[instrument(skip_all, fields(config_uri = %self.config_uri))]
    fn data_key(&self, create: bool) -> Result<Option<DataKey>, PropertiesError> {
        let mut slot = self.slot()?;
        if let Some(key) = slot.as_ref() {
            return Ok(Some(key.clone()));
        }

        let mut executor = RetryExecutor::new(OperationType::Open, &self.config_uri, &self.options);
        match self.open_container(&mut executor, create) {
            Ok(None) => Ok(None),
            Ok(Some(key)) => {
                *slot = Some(key.clone());
                debug!("data key ready");
                Ok(Some(key))
            }
            Err(abort) => {
                error!(error = %abort.error, "cannot load data key");
                if abort.cleanup {
                    match self.inner.clear() {
                        Ok(()) => warn!("container cleared; a new data key is created on next access"),
                        Err(err) => error!(%err, "failed to clear container"),
                    }
                }
                Err(abort.error)
            }
        }
    }

    fn open_container(
        &self,
        executor: &mut RetryExecutor<'_>,
        create: bool,
    ) -> Result<Option<DataKey>, Abort> {
        let keys = executor.execute("loadKeys", "", Action::Fail, || {
            self.inner.keys().map_err(inner)
        })?;

        if keys.is_empty() && !create {
            return Ok(None);
        }
        if !keys.contains(RESERVED_KEY) {
            return self.upgrade(executor, keys).map(Some);
        }

        let encoded = executor.execute("loadKeyRecord", RESERVED_KEY, Action::Fail, || {
            self.inner.get_bytes(RESERVED_KEY).map_err(inner)
        })?;
        executor
            .execute("decryptDataKey", RESERVED_KEY, Action::Fail, || {
                self.unwrap_data_key(&encoded).map_err(AttemptError::fatal)
            })
            .map(Some)
    }

    fn unwrap_data_key(&self, encoded: &[u8]) -> Result<DataKey, PropertiesError> {
        let decoded = EncryptionKeyRecord::decode(encoded).map_err(|e| codec(RESERVED_KEY, e))?;
        let record = decoded.verify().map_err(|e| codec(RESERVED_KEY, e))?;

        let key = self
            .key_store
            .decrypt_ad(
                &record.main_key_alias,
                record.data_key_algorithm,
                &record.main_key_checksum,
                &record.data_key_iv,
                self.config_uri.as_bytes(),
                &record.data_key_ciphertext,
                &record.data_key_tag,
            )
            .map_err(hsm)?;

        if key.len() != record.data_algorithm.key_size() {
            return Err(crypto(CryptoError::InvalidKeyLength {
                algorithm: record.data_algorithm,
                expected: record.data_algorithm.key_size(),
                actual: key.len(),
            }));
        }
        Ok(DataKey {
            algorithm: record.data_algorithm,
            key,
        })
    }

    fn generate_and_store(&self, executor: &mut RetryExecutor<'_>) -> Result<DataKey, Abort> {
        let data_key = DataKey {
            algorithm: self.settings.data_algorithm,
            key: generate_key(self.settings.data_algorithm),
        };
        let key_algorithm = self.settings.key_algorithm;

        let alias = executor.execute("defaultKeyAlias", RESERVED_KEY, Action::Fail, || {
            self.key_store
                .default_key_alias()
                .map_err(|e| AttemptError::retryable(hsm(e)))
        })?;
        let iv = generate_iv(key_algorithm);
        let wrapped = executor.execute("encryptDataKey", RESERVED_KEY, Action::Fail, || {
            self.key_store
                .encrypt_ae(
                    &alias,
                    key_algorithm,
                    &iv,
                    self.config_uri.as_bytes(),
                    &data_key.key,
                )
                .map_err(|e| AttemptError::retryable(hsm(e)))
        })?;

        let encoded = EncryptionKeyRecord {
            main_key_alias: alias,
            main_key_checksum: wrapped.checksum,
            data_key_algorithm: key_algorithm,
            data_key_iv: iv,
            data_key_ciphertext: wrapped.ciphertext,
            data_key_tag: wrapped.tag,
            data_algorithm: data_key.algorithm,
        }
        .encode(self.settings.digest);

        executor.execute("storeKeyRecord", RESERVED_KEY, Action::Retry, || {
            self.inner.put_bytes(RESERVED_KEY, &encoded).map_err(inner)
        })?;
        debug!(config_uri = %self.config_uri, "key record stored");
        Ok(data_key)
    }

    /// Encrypts the values of a container that has no key record yet.
    ///
    /// The key record is stored before any value is rewritten, so a key store
    /// failure leaves the container untouched. Values that are already sealed
    /// records belong to a data key that no longer exists; they are dropped,
    /// never re-wrapped as plaintext.
    fn upgrade(
        &self,
        executor: &mut RetryExecutor<'_>,
        keys: HashSet<String>,
    ) -> Result<DataKey, Abort> {
        let mut plain: Vec<(String, Zeroizing<Vec<u8>>)> = Vec::with_capacity(keys.len());
        let mut lost = Vec::new();
        for key in keys {
            if self.is_orphaned_record(&key) {
                warn!(
                    config_uri = %self.config_uri,
                    key = %key,
                    "value sealed under a lost data key"
                );
                lost.push(key);
                continue;
            }
            // Strings first: a byte read of a text value may decode by accident.
            let loaded = executor.execute("upgradeLoadValue", &key, Action::Retry, || {
                match self.inner.get_string(&key) {
                    Ok(text) => Ok(Zeroizing::new(text.into_bytes())),
                    Err(_) => self.inner.get_bytes(&key).map(Zeroizing::new).map_err(inner),
                }
            });
            match loaded {
                Ok(value) => plain.push((key, value)),
                Err(abort) => {
                    warn!(
                        config_uri = %self.config_uri,
                        key = %key,
                        error = %abort.error,
                        "unreadable entry"
                    );
                    lost.push(key);
                }
            }
        }

        let data_key = self.generate_and_store(executor)?;

        let mut rewritten = 0usize;
        for (key, value) in &plain {
            let stored = self
                .seal_value(&data_key, key, value)
                .map_err(AttemptError::fatal)
                .and_then(|encoded| {
                    executor
                        .execute("upgradeStoreValue", key, Action::Retry, || {
                            self.inner.put_bytes(key, &encoded).map_err(inner)
                        })
                        .map_err(|abort| AttemptError::fatal(abort.error))
                });
            match stored {
                Ok(()) => rewritten += 1,
                Err(failure) => {
                    warn!(
                        config_uri = %self.config_uri,
                        key = %key,
                        error = %failure.error,
                        "cannot encrypt entry"
                    );
                    lost.push(key.clone());
                }
            }
        }

        for key in &lost {
            let removed = executor.execute("removeLostValue", key, Action::Retry, || {
                self.inner.remove(key).map_err(inner)
            });
            match removed {
                Ok(()) => warn!(
                    config_uri = %self.config_uri,
                    key = %key,
                    "entry lost during encryption upgrade"
                ),
                Err(abort) => error!(
                    config_uri = %self.config_uri,
                    key = %key,
                    error = %abort.error,
                    "cannot remove lost entry"
                ),
            }
        }
        debug!(
            config_uri = %self.config_uri,
            rewritten,
            lost = lost.len(),
            "container upgraded"
        );
        Ok(data_key)
    }

    /// A stored value that parses as a [`DataRecord`] with a matching digest.
    fn is_orphaned_record(&self, key: &str) -> bool {
        match self.inner.get_bytes(key) {
            Ok(bytes) => DataRecord::decode(&bytes)
                .map(|decoded| decoded.digest_matches())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn seal_value(
        &self,
        data_key: &DataKey,
        key: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PropertiesError> {
        let iv = generate_iv(data_key.algorithm);
        let sealed = aead::seal(data_key.algorithm, &data_key.key, &iv, key.as_bytes(), plaintext)
            .map_err(crypto)?;
        Ok(DataRecord {
            iv,
            ciphertext: sealed.ciphertext,
            tag: sealed.tag,
        }
        .encode(self.settings.digest))
    }

    fn open_value(
        &self,
        data_key: &DataKey,
        key: &str,
        encoded: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, PropertiesError> {
        let record = DataRecord::decode(encoded)
            .and_then(|decoded| decoded.verify())
            .map_err(|e| codec(key, e))?;
        aead::open(
            data_key.algorithm,
            &data_key.key,
            &record.iv,
            key.as_bytes(),
            &record.ciphertext,
            &record.tag,
        )
        .map_err(crypto)
    }

    /// Deletes `key` after the callback asked for cleanup.
    fn drop_value(&self, executor: &mut RetryExecutor<'_>, key: &str) {
        let removed = executor.execute("removeValue", key, Action::Fail, || {
            self.inner.remove(key).map_err(inner)
        });
        match removed {
            Ok(()) => warn!(config_uri = %self.config_uri, key, "value dropped"),
            Err(abort) => {
                error!(config_uri = %self.config_uri, key, error = %abort.error, "cleanup failed")
            }
        }
    }

    fn settle<T>(
        &self,
        executor: &mut RetryExecutor<'_>,
        key: &str,
        result: Result<T, Abort>,
    ) -> Result<T, PropertiesError> {
        match result {
            Ok(value) => Ok(value),
            Err(abort) => {
                if abort.cleanup {
                    self.drop_value(executor, key);
                }
                Err(abort.error)
            }
        }
    }
}

impl Properties for EncryptedProperties {
    #[instrument(skip_all, fields(config_uri = %self.config_uri, key))]
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, PropertiesError> {
        reject_reserved(key)?;
        let not_found = || PropertiesError::NotFound {
            key: key.to_string(),
        };
        let data_key = self.data_key(false)?.ok_or_else(not_found)?;

        let mut executor = RetryExecutor::new(OperationType::Get, &self.config_uri, &self.options);
        let result = executor.execute("loadAndDecrypt", key, Action::Fail, || {
            let encoded = match self.inner.get_bytes(key) {
                Ok(encoded) => encoded,
                Err(PropertiesError::NotFound { .. }) => return Ok(None),
                Err(err) => return Err(AttemptError::retryable(err)),
            };
            self.open_value(&data_key, key, &encoded)
                .map(Some)
                .map_err(AttemptError::retryable)
        });
        match self.settle(&mut executor, key, result)? {
            Some(plaintext) => {
                debug!("get succeeded");
                Ok(plaintext.to_vec())
            }
            None => Err(not_found()),
        }
    }

    #[instrument(skip_all, fields(config_uri = %self.config_uri, key))]
    fn put_bytes(&self, key: &str, value: &[u8]) -> Result<(), PropertiesError> {
        reject_reserved(key)?;
        let data_key = self.data_key(true)?.ok_or_else(|| PropertiesError::Unknown {
            reason: "no data key".to_string(),
        })?;

        let mut executor = RetryExecutor::new(OperationType::Put, &self.config_uri, &self.options);
        let sealed = executor.execute("encryptValue", key, Action::Fail, || {
            self.seal_value(&data_key, key, value)
                .map_err(AttemptError::retryable)
        });
        let encoded = self.settle(&mut executor, key, sealed)?;

        let stored = executor.execute("storeValue", key, Action::Retry, || {
            self.inner.put_bytes(key, &encoded).map_err(inner)
        });
        self.settle(&mut executor, key, stored)?;
        debug!("put succeeded");
        Ok(())
    }

    #[instrument(skip_all, fields(config_uri = %self.config_uri, key))]
    fn remove(&self, key: &str) -> Result<(), PropertiesError> {
        reject_reserved(key)?;
        let mut executor = RetryExecutor::new(OperationType::Put, &self.config_uri, &self.options);
        executor
            .execute("removeValue", key, Action::Fail, || {
                self.inner.remove(key).map_err(inner)
            })
            .map_err(|abort| abort.error)
    }

    fn keys(&self) -> Result<HashSet<String>, PropertiesError> {
        let mut executor = RetryExecutor::new(OperationType::Get, &self.config_uri, &self.options);
        let mut keys = executor
            .execute("loadKeys", "", Action::Fail, || self.inner.keys().map_err(inner))
            .map_err(|abort| abort.error)?;
        keys.remove(RESERVED_KEY);
        Ok(keys)
    }

    /// Removes every value and stores a fresh key record.
    #[instrument(skip_all, fields(config_uri = %self.config_uri))]
    fn clear(&self) -> Result<(), PropertiesError> {
        let mut slot = self.slot()?;
        let mut executor = RetryExecutor::new(OperationType::Put, &self.config_uri, &self.options);
        *slot = None;
        executor
            .execute("clearValues", "", Action::Fail, || {
                self.inner.clear().map_err(inner)
            })
            .map_err(|abort| abort.error)?;
        let data_key = self
            .generate_and_store(&mut executor)
            .map_err(|abort| abort.error)?;
        *slot = Some(data_key);
        debug!("container cleared");
        Ok(())
    }
}

/// Wraps every container of an inner factory with [`EncryptedProperties`].
///
/// One instance is kept per config URI so that all users of a container
/// share its data key and initialisation lock.
pub struct EncryptedPropertiesFactory {
    inner: Arc<dyn PropertiesFactory>,
    key_store: Arc<dyn KeyStore>,
    settings: EncryptionSettings,
    options: StoreOptions,
    containers: Mutex<HashMap<String, Arc<EncryptedProperties>>>,
}

impl EncryptedPropertiesFactory {
    pub fn new(inner: Arc<dyn PropertiesFactory>, key_store: Arc<dyn KeyStore>) -> Self {
        Self {
            inner,
            key_store,
            settings: EncryptionSettings::default(),
            options: StoreOptions::default(),
            containers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: EncryptionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn container(&self, config_uri: &str) -> Result<Arc<EncryptedProperties>, PropertiesError> {
        let mut containers = self.containers.lock().map_err(|err| PropertiesError::Unknown {
            reason: format!("lock poisoned: {err}"),
        })?;
        if let Some(existing) = containers.get(config_uri) {
            return Ok(Arc::clone(existing));
        }

        let inner = self.inner.properties(config_uri)?;
        let container = Arc::new(EncryptedProperties::new(
            config_uri,
            inner,
            Arc::clone(&self.key_store),
            self.settings,
            self.options.clone(),
        ));
        containers.insert(config_uri.to_string(), Arc::clone(&container));
        Ok(container)
    }
}

impl PropertiesFactory for EncryptedPropertiesFactory {
    fn properties(&self, config_uri: &str) -> Result<Arc<dyn Properties>, PropertiesError> {
        let container: Arc<dyn Properties> = self.container(config_uri)?;
        Ok(container)
    }
}

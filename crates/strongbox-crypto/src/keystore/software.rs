use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    aead::{self, key_check_value},
    algorithm::AlgorithmType,
    error::{CryptoError, KeyStoreError},
    keystore::{AeadOutput, Encrypted, KeyStore, MasterKeyProvider},
};

/// Exclusive access to the master key provider. Handles keep it alive.
struct Session {
    provider: Box<dyn MasterKeyProvider>,
    lock: Mutex<()>,
}

impl Session {
    fn enter(&self) -> Result<MutexGuard<'_, ()>, KeyStoreError> {
        self.lock
            .lock()
            .map_err(|err| KeyStoreError::Session(format!("lock poisoned: {err}")))
    }
}

/// A loaded master key bound to the session it came from.
pub struct KeyHandle {
    session: Arc<Session>,
    alias: String,
    algorithm: AlgorithmType,
    key: Zeroizing<Vec<u8>>,
    checksum: Vec<u8>,
}

impl KeyHandle {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn algorithm(&self) -> AlgorithmType {
        self.algorithm
    }

    /// Key check value of the loaded key.
    pub fn checksum(&self) -> &[u8] {
        &self.checksum
    }

    fn seal(&self, iv: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<aead::Sealed, KeyStoreError> {
        let _guard = self.session.enter()?;
        Ok(aead::seal(self.algorithm, &self.key, iv, aad, plaintext)?)
    }

    fn open(
        &self,
        checksum: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        if checksum != self.checksum.as_slice() {
            warn!(alias = %self.alias, "key checksum mismatch, key was rotated or replaced");
            return Err(KeyStoreError::ChecksumMismatch {
                alias: self.alias.clone(),
            });
        }
        let _guard = self.session.enter()?;
        Ok(aead::open(self.algorithm, &self.key, iv, aad, ciphertext, tag)?)
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("alias", &self.alias)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

type HandleCache = HashMap<(String, usize), Arc<KeyHandle>>;

/// Key store over a [`MasterKeyProvider`].
///
/// Keys are located by alias and length and cached for the lifetime of the
/// store; the cache is never written back to the provider. A key is created
/// on demand only when encrypting.
pub struct SoftwareKeyStore {
    session: Arc<Session>,
    default_alias: Option<String>,
    cache: Mutex<HandleCache>,
}

impl SoftwareKeyStore {
    pub fn new(provider: impl MasterKeyProvider + 'static) -> Self {
        Self {
            session: Arc::new(Session {
                provider: Box::new(provider),
                lock: Mutex::new(()),
            }),
            default_alias: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_alias(mut self, alias: impl Into<String>) -> Self {
        self.default_alias = Some(alias.into());
        self
    }

    /// Returns the handle for `alias`, loading it through the session on a
    /// cache miss.
    #[instrument(skip_all, fields(alias = %alias, algorithm = ?algorithm))]
    pub fn key(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        create: bool,
    ) -> Result<Arc<KeyHandle>, KeyStoreError> {
        let cache_key = (alias.to_string(), algorithm.key_size());
        let mut cache = self
            .cache
            .lock()
            .map_err(|err| KeyStoreError::Session(format!("lock poisoned: {err}")))?;
        if let Some(handle) = cache.get(&cache_key) {
            return Ok(Arc::clone(handle));
        }

        let material = {
            let _guard = self.session.enter()?;
            if create {
                Some(
                    self.session
                        .provider
                        .get_or_create(alias, algorithm.key_size())?,
                )
            } else {
                self.session.provider.load(alias)?
            }
        }
        .ok_or_else(|| KeyStoreError::KeyNotFound {
            alias: alias.to_string(),
        })?;

        if material.bytes.len() != algorithm.key_size() {
            return Err(KeyStoreError::KeyTypeMismatch {
                alias: alias.to_string(),
                algorithm,
            });
        }
        let checksum = key_check_value(&material.bytes)?;

        let handle = Arc::new(KeyHandle {
            session: Arc::clone(&self.session),
            alias: alias.to_string(),
            algorithm,
            key: material.bytes,
            checksum,
        });
        cache.insert(cache_key, Arc::clone(&handle));
        debug!("master key loaded");
        Ok(handle)
    }
}

impl fmt::Debug for SoftwareKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareKeyStore")
            .field("default_alias", &self.default_alias)
            .finish_non_exhaustive()
    }
}

impl KeyStore for SoftwareKeyStore {
    fn default_key_alias(&self) -> Result<String, KeyStoreError> {
        self.default_alias
            .clone()
            .ok_or(KeyStoreError::NoDefaultAlias)
    }

    fn encrypt(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        iv: &[u8],
        plaintext: &[u8],
    ) -> Result<Encrypted, KeyStoreError> {
        let handle = self.key(alias, algorithm, true)?;
        let sealed = handle.seal(iv, &[], plaintext)?;
        let mut ciphertext = sealed.ciphertext;
        ciphertext.extend_from_slice(&sealed.tag);
        Ok(Encrypted {
            checksum: handle.checksum.clone(),
            ciphertext,
        })
    }

    fn encrypt_ae(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<AeadOutput, KeyStoreError> {
        let handle = self.key(alias, algorithm, true)?;
        let sealed = handle.seal(iv, aad, plaintext)?;
        Ok(AeadOutput {
            checksum: handle.checksum.clone(),
            ciphertext: sealed.ciphertext,
            tag: sealed.tag,
        })
    }

    fn decrypt(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        checksum: &[u8],
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let tag_size = algorithm.tag_size();
        if ciphertext.len() < tag_size {
            return Err(CryptoError::InvalidTagLength {
                expected: tag_size,
                actual: ciphertext.len(),
            }
            .into());
        }
        let (body, tag) = ciphertext.split_at(ciphertext.len() - tag_size);
        let handle = self.key(alias, algorithm, false)?;
        handle.open(checksum, iv, &[], body, tag)
    }

    fn decrypt_ad(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        checksum: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let handle = self.key(alias, algorithm, false)?;
        handle.open(checksum, iv, aad, ciphertext, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aead::generate_iv,
        keystore::{InMemoryKeyProvider, KeyMaterial},
    };

    fn store(provider: &InMemoryKeyProvider) -> SoftwareKeyStore {
        SoftwareKeyStore::new(provider.clone()).with_default_alias("default")
    }

    #[test]
    fn default_alias_must_be_configured() {
        let bare = SoftwareKeyStore::new(InMemoryKeyProvider::default());
        assert_eq!(bare.default_key_alias(), Err(KeyStoreError::NoDefaultAlias));

        let configured = store(&InMemoryKeyProvider::default());
        assert_eq!(configured.default_key_alias().unwrap(), "default");
    }

    #[test]
    fn ae_round_trip_returns_key_check_value() {
        let provider = InMemoryKeyProvider::default();
        let keys = store(&provider);
        let iv = generate_iv(AlgorithmType::Aes256Gcm);

        let out = keys
            .encrypt_ae("default", AlgorithmType::Aes256Gcm, &iv, b"uri", b"data key")
            .unwrap();
        let master = provider.load("default").unwrap().expect("provisioned");
        assert_eq!(out.checksum, key_check_value(&master.bytes).unwrap());

        let plain = keys
            .decrypt_ad(
                "default",
                AlgorithmType::Aes256Gcm,
                &out.checksum,
                &iv,
                b"uri",
                &out.ciphertext,
                &out.tag,
            )
            .unwrap();
        assert_eq!(plain.as_slice(), b"data key");
    }

    #[test]
    fn plain_encrypt_appends_tag() {
        let keys = store(&InMemoryKeyProvider::default());
        let iv = generate_iv(AlgorithmType::Aes256Gcm);
        let out = keys
            .encrypt("default", AlgorithmType::Aes256Gcm, &iv, b"abc")
            .unwrap();
        assert_eq!(out.ciphertext.len(), 3 + AlgorithmType::Aes256Gcm.tag_size());

        let plain = keys
            .decrypt(
                "default",
                AlgorithmType::Aes256Gcm,
                &out.checksum,
                &iv,
                &out.ciphertext,
            )
            .unwrap();
        assert_eq!(plain.as_slice(), b"abc");

        assert!(keys
            .decrypt("default", AlgorithmType::Aes256Gcm, &out.checksum, &iv, &[1, 2])
            .is_err());
    }

    #[test]
    fn rotated_key_is_detected_by_checksum() {
        let provider = InMemoryKeyProvider::default();
        let iv = generate_iv(AlgorithmType::Aes256Gcm);
        let out = store(&provider)
            .encrypt_ae("default", AlgorithmType::Aes256Gcm, &iv, b"", b"secret")
            .unwrap();

        provider.rotate("default").unwrap();
        let err = store(&provider)
            .decrypt_ad(
                "default",
                AlgorithmType::Aes256Gcm,
                &out.checksum,
                &iv,
                b"",
                &out.ciphertext,
                &out.tag,
            )
            .unwrap_err();
        assert_eq!(
            err,
            KeyStoreError::ChecksumMismatch {
                alias: "default".to_string()
            }
        );
    }

    #[test]
    fn decrypt_never_provisions_keys() {
        let provider = InMemoryKeyProvider::default();
        let keys = store(&provider);
        let err = keys
            .decrypt_ad(
                "absent",
                AlgorithmType::Aes256Gcm,
                &[0; 3],
                &[0; 12],
                b"",
                b"",
                &[0; 16],
            )
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::KeyNotFound { .. }));
        assert!(provider.load("absent").unwrap().is_none());
    }

    #[test]
    fn key_length_must_match_algorithm() {
        let provider = InMemoryKeyProvider::default();
        provider
            .store(&KeyMaterial::new("short", vec![7; 16]))
            .unwrap();
        let keys = store(&provider);
        let iv = generate_iv(AlgorithmType::Aes256Gcm);

        assert!(matches!(
            keys.encrypt_ae("short", AlgorithmType::Aes256Gcm, &iv, b"", b"x"),
            Err(KeyStoreError::KeyTypeMismatch { .. })
        ));
        assert!(keys
            .encrypt_ae("short", AlgorithmType::Aes128Gcm, &iv, b"", b"x")
            .is_ok());
    }

    #[test]
    fn handles_are_cached_and_keep_session_alive() {
        let provider = InMemoryKeyProvider::default();
        let keys = store(&provider);
        let first = keys.key("default", AlgorithmType::Aes256Gcm, true).unwrap();
        let second = keys.key("default", AlgorithmType::Aes256Gcm, true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        drop(keys);
        assert_eq!(first.alias(), "default");
        assert_eq!(first.checksum().len(), 3);
        let iv = generate_iv(AlgorithmType::Aes256Gcm);
        assert!(first.seal(&iv, b"", b"still usable").is_ok());
    }
}

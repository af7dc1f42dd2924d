use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::KeyError;

/// Master key bytes for one alias. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub alias: String,
    pub bytes: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(alias: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            alias: alias.into(),
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn generate(alias: impl Into<String>, length: usize) -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; length]);
        OsRng.fill_bytes(&mut bytes);
        Self {
            alias: alias.into(),
            bytes,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("alias", &self.alias)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Source of master keys (OS keychain in production; memory in tests).
pub trait MasterKeyProvider: Send + Sync {
    /// Returns the key stored under `alias`, if any.
    fn load(&self, alias: &str) -> Result<Option<KeyMaterial>, KeyError>;

    fn store(&self, material: &KeyMaterial) -> Result<(), KeyError>;

    /// Loads `alias`, provisioning a random key of `length` bytes if absent.
    fn get_or_create(&self, alias: &str, length: usize) -> Result<KeyMaterial, KeyError> {
        if let Some(existing) = self.load(alias)? {
            return Ok(existing);
        }
        let material = KeyMaterial::generate(alias, length);
        self.store(&material)?;
        debug!(alias, length, "provisioned master key");
        Ok(material)
    }
}

/// OS keyring-backed provider. Each alias is one keyring account.
pub struct KeyringProvider {
    service: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, alias).map_err(|e| KeyError::Keyring(e.to_string()))
    }
}

impl MasterKeyProvider for KeyringProvider {
    fn load(&self, alias: &str) -> Result<Option<KeyMaterial>, KeyError> {
        match self.entry(alias)?.get_password() {
            Ok(secret) => decode_key(alias, &secret).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }

    fn store(&self, material: &KeyMaterial) -> Result<(), KeyError> {
        self.entry(&material.alias)?
            .set_password(&encode_key(material))
            .map_err(|e| KeyError::Keyring(e.to_string()))
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<HashMap<String, KeyMaterial>>>,
}

impl InMemoryKeyProvider {
    /// Replaces the key under `alias` with a fresh one of the same length.
    pub fn rotate(&self, alias: &str) -> Result<(), KeyError> {
        let mut guard = self.lock()?;
        let length = guard
            .get(alias)
            .map(|material| material.bytes.len())
            .ok_or_else(|| KeyError::Generation(format!("no key to rotate for {alias}")))?;
        guard.insert(alias.to_string(), KeyMaterial::generate(alias, length));
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, KeyMaterial>>, KeyError> {
        self.inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))
    }
}

impl MasterKeyProvider for InMemoryKeyProvider {
    fn load(&self, alias: &str) -> Result<Option<KeyMaterial>, KeyError> {
        Ok(self.lock()?.get(alias).cloned())
    }

    fn store(&self, material: &KeyMaterial) -> Result<(), KeyError> {
        self.lock()?.insert(material.alias.clone(), material.clone());
        Ok(())
    }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes.as_slice())
}

fn decode_key(alias: &str, secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    if bytes.len() != 16 && bytes.len() != 32 {
        return Err(KeyError::Decode(format!(
            "expected 16 or 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(KeyMaterial::new(alias, bytes))
}

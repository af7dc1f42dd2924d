use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use thiserror::Error;

use crate::callback::StatusCode;

/// Errors produced by properties containers and factories.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropertiesError {
    /// Requested key does not exist.
    #[error("entry not found for key: {key}")]
    NotFound { key: String },
    /// The key is reserved for container metadata and cannot be used by clients.
    #[error("key is reserved: {key}")]
    ReservedKey { key: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    InnerStorage { reason: String },
    /// Key store failure, including a master key checksum mismatch.
    #[error("key store failure: {reason}")]
    Hsm { reason: String },
    /// Cipher failure, including AEAD tag verification.
    #[error("crypto failure: {reason}")]
    Crypto { reason: String },
    /// Stored digest does not match the recomputed digest.
    #[error("digest mismatch for key: {key}")]
    Digest { key: String },
    #[error("{reason}")]
    Unknown { reason: String },
}

impl PropertiesError {
    /// Taxonomy code reported to error callbacks.
    pub fn status(&self) -> StatusCode {
        match self {
            PropertiesError::NotFound { .. } | PropertiesError::InnerStorage { .. } => {
                StatusCode::InnerStorage
            }
            PropertiesError::Hsm { .. } => StatusCode::Hsm,
            PropertiesError::Crypto { .. } => StatusCode::Crypto,
            PropertiesError::Digest { .. } => StatusCode::Digest,
            PropertiesError::ReservedKey { .. } | PropertiesError::Unknown { .. } => {
                StatusCode::Unknown
            }
        }
    }

    pub fn storage<E: ToString>(err: E) -> Self {
        PropertiesError::InnerStorage {
            reason: err.to_string(),
        }
    }
}

/// A named container of byte values, addressed by string keys.
///
/// All calls are synchronous and may block on storage or key store I/O.
pub trait Properties: Send + Sync {
    /// Retrieve the value for a key.
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, PropertiesError>;

    /// Persist a value under a key, overwriting any existing entry.
    fn put_bytes(&self, key: &str, value: &[u8]) -> Result<(), PropertiesError>;

    /// Retrieve a UTF-8 value for a key.
    fn get_string(&self, key: &str) -> Result<String, PropertiesError> {
        let bytes = self.get_bytes(key)?;
        String::from_utf8(bytes).map_err(|err| PropertiesError::Unknown {
            reason: format!("value is not UTF-8: {err}"),
        })
    }

    /// Persist a UTF-8 value under a key.
    fn put_string(&self, key: &str, value: &str) -> Result<(), PropertiesError> {
        self.put_bytes(key, value.as_bytes())
    }

    /// Remove a key and its value (idempotent).
    fn remove(&self, key: &str) -> Result<(), PropertiesError>;

    /// List every key currently stored.
    fn keys(&self) -> Result<HashSet<String>, PropertiesError>;

    /// Delete every value in the container.
    fn clear(&self) -> Result<(), PropertiesError>;
}

/// Hands out containers by configuration URI.
pub trait PropertiesFactory: Send + Sync {
    fn properties(&self, config_uri: &str) -> Result<Arc<dyn Properties>, PropertiesError>;
}

/// In-memory container for tests and ephemeral sessions. Values are kept
/// in clear; wrap it with an encrypting factory for anything sensitive.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProperties {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryProperties {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, PropertiesError> {
        self.inner.lock().map_err(|err| PropertiesError::InnerStorage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl Properties for InMemoryProperties {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, PropertiesError> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| PropertiesError::NotFound {
                key: key.to_string(),
            })
    }

    fn put_bytes(&self, key: &str, value: &[u8]) -> Result<(), PropertiesError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PropertiesError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<HashSet<String>, PropertiesError> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn clear(&self) -> Result<(), PropertiesError> {
        self.lock()?.clear();
        Ok(())
    }
}

/// Factory returning one shared [`InMemoryProperties`] per URI.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPropertiesFactory {
    containers: Arc<Mutex<HashMap<String, InMemoryProperties>>>,
}

impl InMemoryPropertiesFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PropertiesFactory for InMemoryPropertiesFactory {
    fn properties(&self, config_uri: &str) -> Result<Arc<dyn Properties>, PropertiesError> {
        let mut containers = self
            .containers
            .lock()
            .map_err(|err| PropertiesError::InnerStorage {
                reason: format!("lock poisoned: {err}"),
            })?;
        let container = containers.entry(config_uri.to_string()).or_default().clone();
        Ok(Arc::new(container))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_bytes_and_strings() {
        let props = InMemoryProperties::new();
        props.put_bytes("token", &[0, 1, 2, 255]).expect("put");
        props.put_string("name", "device").expect("put string");

        assert_eq!(props.get_bytes("token").expect("get"), vec![0, 1, 2, 255]);
        assert_eq!(props.get_string("name").expect("get string"), "device");
        assert_eq!(props.keys().expect("keys").len(), 2);
    }

    #[test]
    fn remove_is_idempotent_and_removes_data() {
        let props = InMemoryProperties::new();
        props.put_bytes("k", b"v").expect("put");
        props.remove("k").expect("remove");
        props.remove("k").expect("remove again");

        let err = props.get_bytes("k").expect_err("should be missing");
        assert!(matches!(err, PropertiesError::NotFound { .. }));
    }

    #[test]
    fn get_string_rejects_invalid_utf8() {
        let props = InMemoryProperties::new();
        props.put_bytes("k", &[0xff, 0xfe]).expect("put");
        let err = props.get_string("k").expect_err("not utf-8");
        assert_eq!(err.status(), StatusCode::Unknown);
    }

    #[test]
    fn factory_shares_container_per_uri() {
        let factory = InMemoryPropertiesFactory::new();
        let first = factory.properties("component/table").expect("open");
        first.put_bytes("k", b"v").expect("put");

        let again = factory.properties("component/table").expect("reopen");
        assert_eq!(again.get_bytes("k").expect("get"), b"v");

        let other = factory.properties("component/other").expect("open other");
        assert!(other.keys().expect("keys").is_empty());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let digest = PropertiesError::Digest { key: "k".into() };
        assert_eq!(digest.status(), StatusCode::Digest);
        assert_eq!(
            PropertiesError::storage("disk full").status(),
            StatusCode::InnerStorage
        );
        assert_eq!(
            PropertiesError::Hsm {
                reason: "checksum".into()
            }
            .status(),
            StatusCode::Hsm
        );
    }
}

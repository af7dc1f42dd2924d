//! Master-key operations by alias.
//!
//! A [`KeyStore`] wraps and unwraps data keys with a master key it never hands
//! out. Every output carries the master key's checksum so a later unwrap can
//! tell whether the key loaded now is the key that produced the input.

mod provider;
mod software;

pub use provider::{InMemoryKeyProvider, KeyMaterial, KeyringProvider, MasterKeyProvider};
pub use software::{KeyHandle, SoftwareKeyStore};

use zeroize::Zeroizing;

use crate::{algorithm::AlgorithmType, error::KeyStoreError};

/// Output of [`KeyStore::encrypt`]: the tag is appended to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    pub checksum: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Output of [`KeyStore::encrypt_ae`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeadOutput {
    pub checksum: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Key operations against master keys addressed by alias.
///
/// Implementations serialize access to their underlying session and are safe
/// to share between containers.
pub trait KeyStore: Send + Sync {
    /// Alias of the master key used for new key records.
    fn default_key_alias(&self) -> Result<String, KeyStoreError>;

    fn encrypt(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        iv: &[u8],
        plaintext: &[u8],
    ) -> Result<Encrypted, KeyStoreError>;

    fn encrypt_ae(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<AeadOutput, KeyStoreError>;

    /// Fails with [`KeyStoreError::ChecksumMismatch`] when `checksum` does not
    /// identify the currently loaded key.
    fn decrypt(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        checksum: &[u8],
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyStoreError>;

    #[allow(clippy::too_many_arguments)]
    fn decrypt_ad(
        &self,
        alias: &str,
        algorithm: AlgorithmType,
        checksum: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyStoreError>;
}

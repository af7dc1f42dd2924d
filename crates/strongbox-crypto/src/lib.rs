//! Cryptographic building blocks for encrypted properties: AEAD helpers, the
//! digest-protected record codecs and the key store that wraps data keys with
//! a master key the caller never sees.

pub mod aead;
pub mod algorithm;
pub mod codec;
pub mod digest;
pub mod error;
pub mod keystore;

pub use algorithm::{AlgorithmType, DigestType};
pub use error::{CodecError, CryptoError, KeyError, KeyStoreError};
pub use keystore::{
    InMemoryKeyProvider, KeyStore, KeyringProvider, MasterKeyProvider, SoftwareKeyStore,
};

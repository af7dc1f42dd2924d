use thiserror::Error;

use crate::algorithm::AlgorithmType;

/// Local cipher failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length for {algorithm:?}: expected {expected}, got {actual}")]
    InvalidKeyLength {
        algorithm: AlgorithmType,
        expected: usize,
        actual: usize,
    },
    #[error("invalid iv length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },
    #[error("invalid tag length: expected {expected}, got {actual}")]
    InvalidTagLength { expected: usize, actual: usize },
    #[error("encrypt failed")]
    Encrypt,
    /// Tag verification failed: wrong key, wrong associated data or tampered input.
    #[error("decrypt failed")]
    Decrypt,
}

/// Record encoding and decoding failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("input truncated while reading {context}")]
    Truncated { context: &'static str },
    #[error("unexpected tag for {context}: expected {expected:#04x}, found {found:#04x}")]
    UnexpectedTag {
        context: &'static str,
        expected: u8,
        found: u8,
    },
    #[error("invalid length encoding for {context}")]
    InvalidLength { context: &'static str },
    #[error("invalid integer encoding for {context}")]
    InvalidInteger { context: &'static str },
    #[error("{count} trailing bytes after {context}")]
    TrailingData { context: &'static str, count: usize },
    #[error("invalid utf-8 in {context}")]
    InvalidUtf8 { context: &'static str },
    #[error("unsupported record version {0}")]
    UnsupportedVersion(i64),
    #[error("unknown algorithm code {0}")]
    UnknownAlgorithm(i64),
    #[error("unknown digest code {0}")]
    UnknownDigest(i64),
    /// Stored digest does not match the recomputed digest.
    #[error("digest mismatch")]
    DigestMismatch,
}

/// Master key provider failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Key store failures. No output is produced when any of these is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("no default key alias configured")]
    NoDefaultAlias,
    #[error("key not found: {alias}")]
    KeyNotFound { alias: String },
    #[error("key {alias} is not compatible with {algorithm:?}")]
    KeyTypeMismatch {
        alias: String,
        algorithm: AlgorithmType,
    },
    /// The loaded master key is not the key that produced the input.
    #[error("key checksum mismatch for {alias}")]
    ChecksumMismatch { alias: String },
    #[error("key session failure: {0}")]
    Session(String),
    #[error(transparent)]
    Provider(#[from] KeyError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

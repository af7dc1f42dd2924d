use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// AES-GCM nonce size in bytes.
pub const GCM_IV_SIZE: usize = 12;
/// AES-GCM tag size in bytes.
pub const GCM_TAG_SIZE: usize = 16;

/// AEAD algorithms usable for data and data-key encryption.
///
/// The discriminants are persisted in encoded records and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmType {
    Aes256Gcm = 1,
    Aes128Gcm = 2,
}

impl AlgorithmType {
    pub fn key_size(self) -> usize {
        match self {
            AlgorithmType::Aes256Gcm => 32,
            AlgorithmType::Aes128Gcm => 16,
        }
    }

    pub fn iv_size(self) -> usize {
        GCM_IV_SIZE
    }

    pub fn tag_size(self) -> usize {
        GCM_TAG_SIZE
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Result<Self, CodecError> {
        match code {
            1 => Ok(AlgorithmType::Aes256Gcm),
            2 => Ok(AlgorithmType::Aes128Gcm),
            other => Err(CodecError::UnknownAlgorithm(other)),
        }
    }
}

/// Digest algorithms protecting encoded records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestType {
    Sha256 = 1,
    Sha512 = 2,
}

impl DigestType {
    pub fn output_size(self) -> usize {
        match self {
            DigestType::Sha256 => 32,
            DigestType::Sha512 => 64,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Result<Self, CodecError> {
        match code {
            1 => Ok(DigestType::Sha256),
            2 => Ok(DigestType::Sha512),
            other => Err(CodecError::UnknownDigest(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AlgorithmType::Aes256Gcm.code(), 1);
        assert_eq!(AlgorithmType::Aes128Gcm.code(), 2);
        assert_eq!(DigestType::Sha256.code(), 1);
        assert_eq!(
            AlgorithmType::from_code(2).expect("known"),
            AlgorithmType::Aes128Gcm
        );
        assert!(matches!(
            DigestType::from_code(9),
            Err(CodecError::UnknownDigest(9))
        ));
    }

    #[test]
    fn key_sizes_follow_algorithm() {
        assert_eq!(AlgorithmType::Aes256Gcm.key_size(), 32);
        assert_eq!(AlgorithmType::Aes128Gcm.key_size(), 16);
        assert_eq!(DigestType::Sha512.output_size(), 64);
    }
}

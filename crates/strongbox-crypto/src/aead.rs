//! AES-GCM encryption with detached tags, key/IV generation and key check values.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    aes::{cipher::BlockEncrypt, Aes128, Aes256, Block},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    algorithm::{AlgorithmType, GCM_TAG_SIZE},
    error::CryptoError,
};

/// Size of the key check value, as reported by PKCS#11 `CKA_CHECK_VALUE`.
pub const KEY_CHECK_VALUE_SIZE: usize = 3;

/// Ciphertext with its detached authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Generates a random key sized for `algorithm`.
pub fn generate_key(algorithm: AlgorithmType) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; algorithm.key_size()]);
    OsRng.fill_bytes(&mut key);
    key
}

/// Generates a random IV sized for `algorithm`.
pub fn generate_iv(algorithm: AlgorithmType) -> Vec<u8> {
    let mut iv = vec![0u8; algorithm.iv_size()];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypts `plaintext`, authenticating `aad` alongside it.
pub fn seal(
    algorithm: AlgorithmType,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Sealed, CryptoError> {
    check_key(algorithm, key)?;
    check_iv(algorithm, iv)?;
    let nonce = Nonce::from_slice(iv);
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let mut ciphertext = match algorithm {
        AlgorithmType::Aes256Gcm => build_aes256(key)?.encrypt(nonce, payload),
        AlgorithmType::Aes128Gcm => build_aes128(key)?.encrypt(nonce, payload),
    }
    .map_err(|_| CryptoError::Encrypt)?;

    if ciphertext.len() < GCM_TAG_SIZE {
        return Err(CryptoError::Encrypt);
    }
    let tag = ciphertext.split_off(ciphertext.len() - GCM_TAG_SIZE);
    Ok(Sealed { ciphertext, tag })
}

/// Decrypts and verifies `ciphertext` against `tag` and `aad`.
pub fn open(
    algorithm: AlgorithmType,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    check_key(algorithm, key)?;
    check_iv(algorithm, iv)?;
    if tag.len() != algorithm.tag_size() {
        return Err(CryptoError::InvalidTagLength {
            expected: algorithm.tag_size(),
            actual: tag.len(),
        });
    }

    let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let nonce = Nonce::from_slice(iv);
    let payload = Payload {
        msg: &combined,
        aad,
    };
    let plaintext = match algorithm {
        AlgorithmType::Aes256Gcm => build_aes256(key)?.decrypt(nonce, payload),
        AlgorithmType::Aes128Gcm => build_aes128(key)?.decrypt(nonce, payload),
    }
    .map_err(|_| CryptoError::Decrypt)?;

    Ok(Zeroizing::new(plaintext))
}

/// First bytes of the AES encryption of an all-zero block under `key`.
///
/// Identifies a key instance without revealing it, so a wrapped key can be
/// matched against the master key that is loaded now.
pub fn key_check_value(key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut block = Block::default();
    match key.len() {
        32 => Aes256::new_from_slice(key)
            .map_err(|_| invalid_key(AlgorithmType::Aes256Gcm, key.len()))?
            .encrypt_block(&mut block),
        16 => Aes128::new_from_slice(key)
            .map_err(|_| invalid_key(AlgorithmType::Aes128Gcm, key.len()))?
            .encrypt_block(&mut block),
        other => return Err(invalid_key(AlgorithmType::Aes256Gcm, other)),
    }
    Ok(block[..KEY_CHECK_VALUE_SIZE].to_vec())
}

fn build_aes256(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| invalid_key(AlgorithmType::Aes256Gcm, key.len()))
}

fn build_aes128(key: &[u8]) -> Result<Aes128Gcm, CryptoError> {
    Aes128Gcm::new_from_slice(key).map_err(|_| invalid_key(AlgorithmType::Aes128Gcm, key.len()))
}

fn check_key(algorithm: AlgorithmType, key: &[u8]) -> Result<(), CryptoError> {
    if key.len() != algorithm.key_size() {
        return Err(invalid_key(algorithm, key.len()));
    }
    Ok(())
}

fn check_iv(algorithm: AlgorithmType, iv: &[u8]) -> Result<(), CryptoError> {
    if iv.len() != algorithm.iv_size() {
        return Err(CryptoError::InvalidIvLength {
            expected: algorithm.iv_size(),
            actual: iv.len(),
        });
    }
    Ok(())
}

fn invalid_key(algorithm: AlgorithmType, actual: usize) -> CryptoError {
    CryptoError::InvalidKeyLength {
        algorithm,
        expected: algorithm.key_size(),
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_recovers_plaintext() {
        let key = generate_key(AlgorithmType::Aes256Gcm);
        let iv = generate_iv(AlgorithmType::Aes256Gcm);
        let sealed = seal(AlgorithmType::Aes256Gcm, &key, &iv, b"token", b"secret")
            .expect("seal");

        assert_eq!(sealed.tag.len(), GCM_TAG_SIZE);
        assert_eq!(sealed.ciphertext.len(), b"secret".len());
        assert_ne!(sealed.ciphertext, b"secret");

        let plain = open(
            AlgorithmType::Aes256Gcm,
            &key,
            &iv,
            b"token",
            &sealed.ciphertext,
            &sealed.tag,
        )
        .expect("open");
        assert_eq!(plain.as_slice(), b"secret");
    }

    #[test]
    fn open_rejects_wrong_associated_data() {
        let key = generate_key(AlgorithmType::Aes128Gcm);
        let iv = generate_iv(AlgorithmType::Aes128Gcm);
        let sealed = seal(AlgorithmType::Aes128Gcm, &key, &iv, b"a", b"value").expect("seal");

        let err = open(
            AlgorithmType::Aes128Gcm,
            &key,
            &iv,
            b"b",
            &sealed.ciphertext,
            &sealed.tag,
        )
        .expect_err("aad mismatch");
        assert_eq!(err, CryptoError::Decrypt);
    }

    #[test]
    fn empty_plaintext_is_supported() {
        let key = generate_key(AlgorithmType::Aes256Gcm);
        let iv = generate_iv(AlgorithmType::Aes256Gcm);
        let sealed = seal(AlgorithmType::Aes256Gcm, &key, &iv, b"", b"").expect("seal");
        assert!(sealed.ciphertext.is_empty());
        let plain = open(AlgorithmType::Aes256Gcm, &key, &iv, b"", &[], &sealed.tag)
            .expect("open");
        assert!(plain.is_empty());
    }

    #[test]
    fn rejects_bad_lengths_without_panicking() {
        let key = generate_key(AlgorithmType::Aes256Gcm);
        assert!(matches!(
            seal(AlgorithmType::Aes256Gcm, &key, &[0u8; 5], b"", b"x"),
            Err(CryptoError::InvalidIvLength { .. })
        ));
        assert!(matches!(
            seal(AlgorithmType::Aes128Gcm, &key, &[0u8; 12], b"", b"x"),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
        assert!(matches!(
            open(AlgorithmType::Aes256Gcm, &key, &[0u8; 12], b"", b"x", &[0u8; 3]),
            Err(CryptoError::InvalidTagLength { .. })
        ));
    }

    #[test]
    fn key_check_value_matches_known_vector() {
        // AES-256 encryption of the zero block under the zero key starts with dc95c0.
        let kcv = key_check_value(&[0u8; 32]).expect("kcv");
        assert_eq!(kcv, vec![0xdc, 0x95, 0xc0]);

        // AES-128 zero key / zero block starts with 66e94b.
        let kcv = key_check_value(&[0u8; 16]).expect("kcv");
        assert_eq!(kcv, vec![0x66, 0xe9, 0x4b]);

        assert!(key_check_value(&[0u8; 7]).is_err());
    }
}

use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::algorithm::DigestType;

/// Incremental digest over the configured hash.
#[derive(Debug, Clone)]
pub enum Digester {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Digester {
    pub fn new(kind: DigestType) -> Self {
        match kind {
            DigestType::Sha256 => Digester::Sha256(Sha256::new()),
            DigestType::Sha512 => Digester::Sha512(Sha512::new()),
        }
    }

    pub fn process(&mut self, data: &[u8]) {
        match self {
            Digester::Sha256(hasher) => hasher.update(data),
            Digester::Sha512(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Digester::Sha256(hasher) => hasher.finalize().to_vec(),
            Digester::Sha512(hasher) => hasher.finalize().to_vec(),
        }
    }
}

/// One-shot digest of `data`.
pub fn digest(kind: DigestType, data: &[u8]) -> Vec<u8> {
    let mut digester = Digester::new(kind);
    digester.process(data);
    digester.finalize()
}

/// Constant-time comparison of two digests.
pub fn digests_equal(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}

//! Digest-protected binary records persisted by the encrypted properties layer.
//!
//! Both records are a DER SEQUENCE of typed fields followed by an OCTET STRING
//! digest computed over the encodings of every preceding field. Decoding
//! surfaces the stored and recomputed digests side by side; callers decide how
//! to react to a mismatch through [`Decoded::verify`] or
//! [`Decoded::digest_matches`].

mod data_record;
pub mod der;
mod key_record;

pub use data_record::DataRecord;
pub use key_record::EncryptionKeyRecord;

use crate::{algorithm::DigestType, digest::digests_equal, error::CodecError};

/// Record layout version written by this crate.
pub const RECORD_VERSION: i64 = 1;

/// A decoded record together with its stored and recomputed digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<T> {
    pub record: T,
    pub digest_algorithm: DigestType,
    /// Digest read from the encoding.
    pub digest: Vec<u8>,
    /// Digest recomputed over the decoded fields.
    pub actual_digest: Vec<u8>,
}

impl<T> Decoded<T> {
    pub fn digest_matches(&self) -> bool {
        digests_equal(&self.digest, &self.actual_digest)
    }

    /// Returns the record if both digests agree.
    pub fn verify(self) -> Result<T, CodecError> {
        if self.digest_matches() {
            Ok(self.record)
        } else {
            Err(CodecError::DigestMismatch)
        }
    }
}

fn check_version(version: i64) -> Result<(), CodecError> {
    if version != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(())
}

use crate::{
    algorithm::{AlgorithmType, DigestType},
    codec::{
        check_version,
        der::{DerReader, DerWriter},
        Decoded, RECORD_VERSION,
    },
    digest::digest,
    error::CodecError,
};

/// Wrapped data key of one container, stored under the reserved property key.
///
/// ```text
/// SEQUENCE {
///   version            INTEGER (1)
///   mainKeyAlias       UTF8String
///   mainKeyChecksum    OCTET STRING
///   dataKeyAlgorithm   ENUMERATED
///   dataKeyIV          OCTET STRING
///   dataKeyCiphertext  OCTET STRING
///   dataKeyTag         OCTET STRING
///   dataAlgorithm      ENUMERATED
///   digestAlgorithm    ENUMERATED
///   digest             OCTET STRING   -- over the encodings of the fields above
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKeyRecord {
    pub main_key_alias: String,
    pub main_key_checksum: Vec<u8>,
    pub data_key_algorithm: AlgorithmType,
    pub data_key_iv: Vec<u8>,
    pub data_key_ciphertext: Vec<u8>,
    pub data_key_tag: Vec<u8>,
    pub data_algorithm: AlgorithmType,
}

impl EncryptionKeyRecord {
    pub fn encode(&self, digest_algorithm: DigestType) -> Vec<u8> {
        let mut writer = DerWriter::new();
        writer.write_integer(RECORD_VERSION);
        writer.write_utf8_string(&self.main_key_alias);
        writer.write_octet_string(&self.main_key_checksum);
        writer.write_enumerated(self.data_key_algorithm.code());
        writer.write_octet_string(&self.data_key_iv);
        writer.write_octet_string(&self.data_key_ciphertext);
        writer.write_octet_string(&self.data_key_tag);
        writer.write_enumerated(self.data_algorithm.code());
        writer.write_enumerated(digest_algorithm.code());

        let checksum = digest(digest_algorithm, writer.as_bytes());
        writer.write_octet_string(&checksum);
        writer.into_sequence()
    }

    /// Parses an encoded record. A digest mismatch is not an error here; see
    /// [`Decoded::verify`].
    pub fn decode(encoded: &[u8]) -> Result<Decoded<Self>, CodecError> {
        let mut reader = DerReader::sequence(encoded, "key record")?;
        check_version(reader.read_integer("version")?)?;
        let main_key_alias = reader.read_utf8_string("main key alias")?;
        let main_key_checksum = reader.read_octet_string("main key checksum")?;
        let data_key_algorithm =
            AlgorithmType::from_code(reader.read_enumerated("data key algorithm")?)?;
        let data_key_iv = reader.read_octet_string("data key iv")?;
        let data_key_ciphertext = reader.read_octet_string("data key ciphertext")?;
        let data_key_tag = reader.read_octet_string("data key tag")?;
        let data_algorithm = AlgorithmType::from_code(reader.read_enumerated("data algorithm")?)?;
        let digest_algorithm = DigestType::from_code(reader.read_enumerated("digest algorithm")?)?;

        let actual_digest = digest(digest_algorithm, reader.consumed());
        let stored = reader.read_octet_string("digest")?;
        reader.finish("key record")?;

        Ok(Decoded {
            record: EncryptionKeyRecord {
                main_key_alias,
                main_key_checksum,
                data_key_algorithm,
                data_key_iv,
                data_key_ciphertext,
                data_key_tag,
                data_algorithm,
            },
            digest_algorithm,
            digest: stored,
            actual_digest,
        })
    }
}

use crate::{
    algorithm::DigestType,
    codec::{
        check_version,
        der::{DerReader, DerWriter},
        Decoded, RECORD_VERSION,
    },
    digest::digest,
    error::CodecError,
};

/// One encrypted property value.
///
/// ```text
/// SEQUENCE {
///   version          INTEGER (1)
///   dataIV           OCTET STRING
///   dataCiphertext   OCTET STRING
///   dataTag          OCTET STRING
///   digestAlgorithm  ENUMERATED
///   digest           OCTET STRING   -- over the encodings of the fields above
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl DataRecord {
    pub fn encode(&self, digest_algorithm: DigestType) -> Vec<u8> {
        let mut writer = DerWriter::new();
        writer.write_integer(RECORD_VERSION);
        writer.write_octet_string(&self.iv);
        writer.write_octet_string(&self.ciphertext);
        writer.write_octet_string(&self.tag);
        writer.write_enumerated(digest_algorithm.code());

        let checksum = digest(digest_algorithm, writer.as_bytes());
        writer.write_octet_string(&checksum);
        writer.into_sequence()
    }

    /// Parses an encoded record. A digest mismatch is not an error here; see
    /// [`Decoded::verify`].
    pub fn decode(encoded: &[u8]) -> Result<Decoded<Self>, CodecError> {
        let mut reader = DerReader::sequence(encoded, "data record")?;
        check_version(reader.read_integer("version")?)?;
        let iv = reader.read_octet_string("data iv")?;
        let ciphertext = reader.read_octet_string("data ciphertext")?;
        let tag = reader.read_octet_string("data tag")?;
        let digest_algorithm = DigestType::from_code(reader.read_enumerated("digest algorithm")?)?;

        let actual_digest = digest(digest_algorithm, reader.consumed());
        let stored = reader.read_octet_string("digest")?;
        reader.finish("data record")?;

        Ok(Decoded {
            record: DataRecord {
                iv,
                ciphertext,
                tag,
            },
            digest_algorithm,
            digest: stored,
            actual_digest,
        })
    }
}

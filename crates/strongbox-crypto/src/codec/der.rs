//! Minimal strict DER subset used by the record codecs.
//!
//! Only definite lengths up to four length octets, minimal INTEGER/ENUMERATED
//! encodings and the five universal tags below are accepted. Every read is
//! bounds-checked; a length that runs past the input is reported as truncation.

use crate::error::CodecError;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0a;
pub const TAG_UTF8_STRING: u8 = 0x0c;
pub const TAG_SEQUENCE: u8 = 0x30;

const MAX_LENGTH_OCTETS: usize = 4;

#[derive(Debug, Default)]
pub struct DerWriter {
    buf: Vec<u8>,
}

impl DerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_integer(&mut self, value: i64) {
        self.write_tlv(TAG_INTEGER, &encode_integer(value));
    }

    pub fn write_enumerated(&mut self, value: i64) {
        self.write_tlv(TAG_ENUMERATED, &encode_integer(value));
    }

    pub fn write_octet_string(&mut self, value: &[u8]) {
        self.write_tlv(TAG_OCTET_STRING, value);
    }

    pub fn write_utf8_string(&mut self, value: &str) {
        self.write_tlv(TAG_UTF8_STRING, value.as_bytes());
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Wraps everything written so far in a SEQUENCE.
    pub fn into_sequence(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len() + 1 + 1 + MAX_LENGTH_OCTETS);
        out.push(TAG_SEQUENCE);
        encode_length(self.buf.len(), &mut out);
        out.extend_from_slice(&self.buf);
        out
    }

    fn write_tlv(&mut self, tag: u8, content: &[u8]) {
        self.buf.push(tag);
        encode_length(content.len(), &mut self.buf);
        self.buf.extend_from_slice(content);
    }
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Cursor over DER input.
#[derive(Debug)]
pub struct DerReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Opens a top-level SEQUENCE that must span the whole input.
    pub fn sequence(input: &'a [u8], context: &'static str) -> Result<Self, CodecError> {
        let mut outer = DerReader::new(input);
        let content = outer.read_tlv(TAG_SEQUENCE, context)?;
        outer.finish(context)?;
        Ok(DerReader::new(content))
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> &'a [u8] {
        &self.input[..self.pos]
    }

    pub fn read_integer(&mut self, context: &'static str) -> Result<i64, CodecError> {
        let content = self.read_tlv(TAG_INTEGER, context)?;
        decode_integer(content, context)
    }

    pub fn read_enumerated(&mut self, context: &'static str) -> Result<i64, CodecError> {
        let content = self.read_tlv(TAG_ENUMERATED, context)?;
        decode_integer(content, context)
    }

    pub fn read_octet_string(&mut self, context: &'static str) -> Result<Vec<u8>, CodecError> {
        Ok(self.read_tlv(TAG_OCTET_STRING, context)?.to_vec())
    }

    pub fn read_utf8_string(&mut self, context: &'static str) -> Result<String, CodecError> {
        let content = self.read_tlv(TAG_UTF8_STRING, context)?;
        String::from_utf8(content.to_vec()).map_err(|_| CodecError::InvalidUtf8 { context })
    }

    /// Fails if unread bytes remain.
    pub fn finish(&self, context: &'static str) -> Result<(), CodecError> {
        let remaining = self.input.len() - self.pos;
        if remaining != 0 {
            return Err(CodecError::TrailingData {
                context,
                count: remaining,
            });
        }
        Ok(())
    }

    fn read_tlv(&mut self, expected: u8, context: &'static str) -> Result<&'a [u8], CodecError> {
        let tag = self.read_byte(context)?;
        if tag != expected {
            return Err(CodecError::UnexpectedTag {
                context,
                expected,
                found: tag,
            });
        }
        let len = self.read_length(context)?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(CodecError::Truncated { context })?;
        let content = &self.input[self.pos..end];
        self.pos = end;
        Ok(content)
    }

    fn read_length(&mut self, context: &'static str) -> Result<usize, CodecError> {
        let first = self.read_byte(context)?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }

        let octets = usize::from(first & 0x7f);
        if octets == 0 || octets > MAX_LENGTH_OCTETS {
            return Err(CodecError::InvalidLength { context });
        }
        let mut len = 0usize;
        for index in 0..octets {
            let byte = self.read_byte(context)?;
            if index == 0 && byte == 0 {
                return Err(CodecError::InvalidLength { context });
            }
            len = (len << 8) | usize::from(byte);
        }
        if len < 0x80 {
            return Err(CodecError::InvalidLength { context });
        }
        Ok(len)
    }

    fn read_byte(&mut self, context: &'static str) -> Result<u8, CodecError> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or(CodecError::Truncated { context })?;
        self.pos += 1;
        Ok(byte)
    }
}

fn decode_integer(content: &[u8], context: &'static str) -> Result<i64, CodecError> {
    if content.is_empty() || content.len() > 8 {
        return Err(CodecError::InvalidInteger { context });
    }
    if content.len() > 1 {
        let redundant = (content[0] == 0x00 && content[1] & 0x80 == 0)
            || (content[0] == 0xff && content[1] & 0x80 != 0);
        if redundant {
            return Err(CodecError::InvalidInteger { context });
        }
    }
    let fill = if content[0] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut bytes = [fill; 8];
    bytes[8 - content.len()..].copy_from_slice(content);
    Ok(i64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_use_minimal_encoding() {
        assert_eq!(encode_integer(0), vec![0x00]);
        assert_eq!(encode_integer(1), vec![0x01]);
        assert_eq!(encode_integer(127), vec![0x7f]);
        assert_eq!(encode_integer(128), vec![0x00, 0x80]);
        assert_eq!(encode_integer(-1), vec![0xff]);
        assert_eq!(encode_integer(-129), vec![0xff, 0x7f]);

        for value in [0, 1, 127, 128, 255, 256, -1, -128, -129, i64::MAX, i64::MIN] {
            let encoded = encode_integer(value);
            assert_eq!(decode_integer(&encoded, "test").expect("decode"), value);
        }
    }

    #[test]
    fn rejects_non_minimal_integers() {
        assert!(decode_integer(&[0x00, 0x01], "test").is_err());
        assert!(decode_integer(&[0xff, 0x80], "test").is_err());
        assert!(decode_integer(&[], "test").is_err());
        assert!(decode_integer(&[1; 9], "test").is_err());
    }

    #[test]
    fn long_lengths_round_trip() {
        let payload = vec![0xab; 300];
        let mut writer = DerWriter::new();
        writer.write_octet_string(&payload);
        assert_eq!(&writer.as_bytes()[..4], &[TAG_OCTET_STRING, 0x82, 0x01, 0x2c]);

        let mut reader = DerReader::new(writer.as_bytes());
        assert_eq!(reader.read_octet_string("payload").expect("read"), payload);
        reader.finish("payload").expect("fully consumed");
    }

    #[test]
    fn rejects_lengths_past_end_of_input() {
        let mut reader = DerReader::new(&[TAG_OCTET_STRING, 0x05, 1, 2]);
        assert_eq!(
            reader.read_octet_string("value"),
            Err(CodecError::Truncated { context: "value" })
        );

        let mut reader = DerReader::new(&[TAG_OCTET_STRING, 0x84, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(
            reader.read_octet_string("value"),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_indefinite_and_oversized_length_forms() {
        let mut reader = DerReader::new(&[TAG_OCTET_STRING, 0x80, 0x00, 0x00]);
        assert!(matches!(
            reader.read_octet_string("value"),
            Err(CodecError::InvalidLength { .. })
        ));

        let mut reader = DerReader::new(&[TAG_OCTET_STRING, 0x85, 0, 0, 0, 0, 1]);
        assert!(matches!(
            reader.read_octet_string("value"),
            Err(CodecError::InvalidLength { .. })
        ));

        let mut reader = DerReader::new(&[TAG_OCTET_STRING, 0x81, 0x05, 1, 2, 3, 4, 5]);
        assert!(matches!(
            reader.read_octet_string("value"),
            Err(CodecError::InvalidLength { .. })
        ));
    }

    #[test]
    fn sequence_rejects_trailing_bytes() {
        let mut writer = DerWriter::new();
        writer.write_integer(1);
        let mut encoded = writer.into_sequence();
        encoded.push(0);
        assert!(matches!(
            DerReader::sequence(&encoded, "record"),
            Err(CodecError::TrailingData { count: 1, .. })
        ));
    }

    #[test]
    fn empty_octet_string_is_legal() {
        let mut writer = DerWriter::new();
        writer.write_octet_string(&[]);
        let mut reader = DerReader::new(writer.as_bytes());
        assert!(reader.read_octet_string("empty").expect("read").is_empty());
    }
}

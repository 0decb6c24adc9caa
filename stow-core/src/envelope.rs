/*!
Binary envelope framing a serialized object.

Layout:

```text
+-------+---------+------------+-------------+---------+
| STOW  | version | header len | header JSON | payload |
| 4 B   | 1 B     | u32 LE     | header len  | rest    |
+-------+---------+------------+-------------+---------+
```

The header carries the type tag, integrity hash and compression algorithm so
a reader can reject foreign or damaged bytes before decoding the payload.
*/

use crate::{Result, StowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Leading bytes of every envelope
pub const ENVELOPE_MAGIC: &[u8; 4] = b"STOW";

/// Current envelope format version
pub const ENVELOPE_FORMAT_VERSION: u8 = 1;

const PREFIX_LEN: usize = ENVELOPE_MAGIC.len() + 1 + 4;

/// Descriptive header written in front of every payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnvelopeHeader {
    /// Rust type name of the persisted value
    pub type_tag: String,

    /// Unique identifier of this serialized form
    pub envelope_id: String,

    /// When the object was serialized
    pub created_at: DateTime<Utc>,

    /// Compression algorithm applied to the payload
    pub compression_algorithm: String,

    /// SHA-256 of the uncompressed payload
    pub content_hash: String,

    /// Size of the uncompressed payload in bytes
    pub uncompressed_size: usize,

    /// Size of the payload as stored (after compression)
    pub payload_size: usize,

    /// Envelope format version
    pub format_version: u8,
}

impl EnvelopeHeader {
    /// Create a header for an object of the given type
    pub fn new<S: Into<String>>(type_tag: S) -> Self {
        Self {
            type_tag: type_tag.into(),
            envelope_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            compression_algorithm: "none".to_string(),
            content_hash: String::new(),
            uncompressed_size: 0,
            payload_size: 0,
            format_version: ENVELOPE_FORMAT_VERSION,
        }
    }

    /// Set the content hash and uncompressed size from the encoded object
    pub fn with_content_hash(mut self, data: &[u8]) -> Self {
        self.content_hash = Self::compute_hash(data);
        self.uncompressed_size = data.len();
        self
    }

    /// Set the compression algorithm
    pub fn with_compression_algorithm<S: Into<String>>(mut self, algorithm: S) -> Self {
        self.compression_algorithm = algorithm.into();
        self
    }

    /// Set the stored payload size
    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    /// Hex-encoded SHA-256 of `data`
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Check the decoded payload against the recorded hash
    pub fn verify_integrity(&self, data: &[u8]) -> Result<()> {
        let computed_hash = Self::compute_hash(data);
        if computed_hash == self.content_hash {
            Ok(())
        } else {
            Err(StowError::corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                self.content_hash, computed_hash
            )))
        }
    }

    /// Validate that all required fields are set
    pub fn validate(&self) -> Result<()> {
        if self.type_tag.is_empty() {
            return Err(StowError::validation("type_tag cannot be empty"));
        }
        if self.content_hash.is_empty() {
            return Err(StowError::validation("content_hash cannot be empty"));
        }
        if self.envelope_id.is_empty() {
            return Err(StowError::validation("envelope_id cannot be empty"));
        }
        Ok(())
    }

    /// Check if this header can be read by the current format version
    pub fn is_compatible(&self) -> bool {
        self.format_version <= ENVELOPE_FORMAT_VERSION
    }
}

/// Frame `payload` behind `header`
pub fn encode(header: &EnvelopeHeader, payload: &[u8]) -> Result<Vec<u8>> {
    header.validate()?;
    let header_json = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header_json.len())
        .map_err(|_| StowError::validation("envelope header exceeds 4 GiB"))?;

    let mut out = Vec::with_capacity(PREFIX_LEN + header_json.len() + payload.len());
    out.extend_from_slice(ENVELOPE_MAGIC);
    out.push(header.format_version);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_json);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split an envelope into its header and stored payload
///
/// Only the framing is checked here; the payload hash is verified after
/// decompression by the caller.
pub fn decode(bytes: &[u8]) -> Result<(EnvelopeHeader, &[u8])> {
    if bytes.is_empty() {
        return Err(StowError::EmptyData("serialized form has zero length".to_string()));
    }
    if bytes.len() < PREFIX_LEN {
        return Err(StowError::corrupt(format!(
            "truncated envelope: {} bytes is shorter than the {PREFIX_LEN} byte prefix",
            bytes.len()
        )));
    }

    let (magic, rest) = bytes.split_at(ENVELOPE_MAGIC.len());
    if magic != ENVELOPE_MAGIC {
        return Err(StowError::corrupt("unrecognized envelope magic"));
    }

    let version = rest[0];
    if version > ENVELOPE_FORMAT_VERSION {
        return Err(StowError::corrupt(format!(
            "unsupported envelope format version {version} (current: {ENVELOPE_FORMAT_VERSION})"
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&rest[1..5]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let body = &rest[5..];
    if body.len() < header_len {
        return Err(StowError::corrupt(format!(
            "truncated envelope header: expected {header_len} bytes, found {}",
            body.len()
        )));
    }

    let (header_json, payload) = body.split_at(header_len);
    let header: EnvelopeHeader = serde_json::from_slice(header_json)
        .map_err(|e| StowError::corrupt(format!("unreadable envelope header: {e}")))?;

    if header.format_version != version || !header.is_compatible() {
        return Err(StowError::corrupt(format!(
            "envelope version mismatch: prefix {version}, header {}",
            header.format_version
        )));
    }
    if payload.len() != header.payload_size {
        return Err(StowError::corrupt(format!(
            "truncated payload: expected {} bytes, found {}",
            header.payload_size,
            payload.len()
        )));
    }

    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let header = EnvelopeHeader::new("test::Model")
            .with_content_hash(payload)
            .with_payload_size(payload.len());
        encode(&header, payload).unwrap()
    }

    #[test]
    fn test_content_hash() {
        let hash = EnvelopeHeader::compute_hash(b"test data");
        assert_eq!(
            hash,
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_integrity_verification() {
        let data = b"test data";
        let header = EnvelopeHeader::new("test::Model").with_content_hash(data);

        assert!(header.verify_integrity(data).is_ok());
        assert!(matches!(
            header.verify_integrity(b"different data"),
            Err(StowError::CorruptData(_))
        ));
    }

    #[test]
    fn test_decode_returns_header_and_payload() {
        let bytes = framed(b"{\"k\":3}");
        let (header, payload) = decode(&bytes).unwrap();

        assert_eq!(header.type_tag, "test::Model");
        assert_eq!(header.format_version, ENVELOPE_FORMAT_VERSION);
        assert_eq!(payload, b"{\"k\":3}");
    }

    #[test]
    fn test_decode_empty_is_empty_data() {
        assert!(matches!(decode(&[]), Err(StowError::EmptyData(_))));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = framed(b"payload");
        bytes[0] = b'X';
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_decode_rejects_newer_version() {
        let mut bytes = framed(b"payload");
        bytes[4] = ENVELOPE_FORMAT_VERSION + 1;
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported envelope format version"));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = framed(b"a payload long enough to cut");
        for cut in [3, PREFIX_LEN, PREFIX_LEN + 4, bytes.len() - 1] {
            let result = decode(&bytes[..cut]);
            assert!(
                matches!(result, Err(StowError::CorruptData(_))),
                "cut at {cut} was accepted"
            );
        }
    }

    #[test]
    fn test_validation() {
        let mut header = EnvelopeHeader::new("test::Model").with_content_hash(b"x");
        assert!(header.validate().is_ok());

        header.type_tag = String::new();
        assert!(matches!(header.validate(), Err(StowError::Validation(_))));
    }
}

/*!
Serializers converting persistable objects to bytes and back.

A [`Serializer`] is a pure pair of functions with no I/O. The store accepts
any implementation; [`NativeSerializer`] is the default.
*/

use crate::compression::{compressor_for, CompressionAdapter, GzipCompressor};
use crate::envelope::{self, EnvelopeHeader};
use crate::{Result, StowError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Anything a serializer can encode. Implemented for every serde type.
pub trait Persistable: Serialize + DeserializeOwned {}

impl<T: Serialize + DeserializeOwned> Persistable for T {}

/// Object <-> bytes codec
pub trait Serializer: Send + Sync {
    /// Encode `object` into its serial form
    fn serialize<T: Persistable>(&self, object: &T) -> Result<Vec<u8>>;

    /// Decode a serial form
    ///
    /// # Errors
    /// * `StowError::EmptyData` - `data` has zero length
    /// * `StowError::CorruptData` - `data` does not decode to a `T`
    fn deserialize<T: Persistable>(&self, data: &[u8]) -> Result<T>;

    /// Short name of the byte format
    fn format_name(&self) -> &str;
}

/// Default byte format: compressed JSON framed in a checksummed envelope
///
/// The envelope records `std::any::type_name` of the saved type. That name
/// follows module paths and compiler versions, so it is informational unless
/// [`NativeSerializer::with_type_check`] turns on strict matching. Without it
/// a load succeeds whenever the payload decodes into the requested type.
///
/// # Example
/// ```rust
/// use stow_core::serializer::{NativeSerializer, Serializer};
///
/// let serializer = NativeSerializer::new();
/// let weights = vec![0.5_f64, 0.25, 0.25];
/// let bytes = serializer.serialize(&weights)?;
/// let restored: Vec<f64> = serializer.deserialize(&bytes)?;
/// assert_eq!(weights, restored);
/// # Ok::<(), stow_core::StowError>(())
/// ```
pub struct NativeSerializer {
    compressor: Box<dyn CompressionAdapter>,
    check_type: bool,
}

impl NativeSerializer {
    /// Create a serializer using gzip compression
    pub fn new() -> Self {
        Self::with_compressor(GzipCompressor::new())
    }

    /// Create a serializer using the given compression adapter
    pub fn with_compressor<C: CompressionAdapter + 'static>(compressor: C) -> Self {
        Self {
            compressor: Box::new(compressor),
            check_type: false,
        }
    }

    /// Reject envelopes whose recorded type name differs from the requested one
    pub fn with_type_check(mut self, enabled: bool) -> Self {
        self.check_type = enabled;
        self
    }

    /// Read and integrity-check an envelope without decoding the object
    ///
    /// Used by tooling that does not know the concrete type stored.
    pub fn inspect(data: &[u8]) -> Result<EnvelopeHeader> {
        let (header, _) = Self::open(data)?;
        Ok(header)
    }

    /// Decode an envelope into its header and untyped JSON content
    ///
    /// Skips the type tag check, so it works for any stored object.
    pub fn decode_untyped(data: &[u8]) -> Result<(EnvelopeHeader, serde_json::Value)> {
        let (header, encoded) = Self::open(data)?;
        let value = serde_json::from_slice(&encoded)
            .map_err(|e| StowError::corrupt(format!("payload does not decode: {e}")))?;
        Ok((header, value))
    }

    /// Decode framing, decompress and verify the payload
    fn open(data: &[u8]) -> Result<(EnvelopeHeader, Vec<u8>)> {
        let (header, payload) = envelope::decode(data)?;

        let compressor = compressor_for(&header.compression_algorithm).ok_or_else(|| {
            StowError::corrupt(format!(
                "unknown compression algorithm '{}'",
                header.compression_algorithm
            ))
        })?;
        let encoded = compressor
            .decompress(payload, header.uncompressed_size)
            .map_err(|e| StowError::corrupt(format!("payload could not be decompressed: {e}")))?;
        if encoded.len() != header.uncompressed_size {
            return Err(StowError::corrupt(format!(
                "payload size mismatch: expected {} bytes, found {}",
                header.uncompressed_size,
                encoded.len()
            )));
        }
        header.verify_integrity(&encoded)?;

        Ok((header, encoded))
    }
}

impl Default for NativeSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NativeSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeSerializer")
            .field("compression", &self.compressor.algorithm_name())
            .field("check_type", &self.check_type)
            .finish()
    }
}

impl Serializer for NativeSerializer {
    fn serialize<T: Persistable>(&self, object: &T) -> Result<Vec<u8>> {
        let encoded = serde_json::to_vec(object)?;
        let payload = self.compressor.compress(&encoded)?;

        let header = EnvelopeHeader::new(std::any::type_name::<T>())
            .with_content_hash(&encoded)
            .with_compression_algorithm(self.compressor.algorithm_name())
            .with_payload_size(payload.len());

        envelope::encode(&header, &payload)
    }

    fn deserialize<T: Persistable>(&self, data: &[u8]) -> Result<T> {
        let (header, encoded) = Self::open(data)?;

        let expected = std::any::type_name::<T>();
        if self.check_type && header.type_tag != expected {
            return Err(StowError::corrupt(format!(
                "unknown type tag '{}' (expected '{expected}')",
                header.type_tag
            )));
        }

        serde_json::from_slice(&encoded)
            .map_err(|e| StowError::corrupt(format!("payload does not decode: {e}")))
    }

    fn format_name(&self) -> &str {
        "native"
    }
}

/// Plain JSON serializer, for objects that should stay human-readable
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Emit indented JSON
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Serializer for JsonSerializer {
    fn serialize<T: Persistable>(&self, object: &T) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(object)?
        } else {
            serde_json::to_vec(object)?
        };
        Ok(bytes)
    }

    fn deserialize<T: Persistable>(&self, data: &[u8]) -> Result<T> {
        if data.is_empty() {
            return Err(StowError::EmptyData(
                "serialized form has zero length".to_string(),
            ));
        }
        serde_json::from_slice(data).map_err(|e| StowError::corrupt(format!("invalid JSON: {e}")))
    }

    fn format_name(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::NoCompression;
    use rand::{Rng, SeedableRng};
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct DummyClassifier {
        strategy: String,
        priors: BTreeMap<String, f64>,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct OtherModel {
        strategy: String,
    }

    fn classifier() -> DummyClassifier {
        let mut priors = BTreeMap::new();
        priors.insert("spam".to_string(), 0.3);
        priors.insert("ham".to_string(), 0.7);
        DummyClassifier {
            strategy: "prior".to_string(),
            priors,
        }
    }

    #[test]
    fn test_native_roundtrip_gzip_and_plain() {
        let model = classifier();
        for serializer in [
            NativeSerializer::new(),
            NativeSerializer::with_compressor(NoCompression::new()),
        ] {
            let bytes = serializer.serialize(&model).unwrap();
            let restored: DummyClassifier = serializer.deserialize(&bytes).unwrap();
            assert_eq!(restored, model);
        }
    }

    #[test]
    fn test_native_reads_any_compression() {
        let bytes = NativeSerializer::with_compressor(NoCompression::new())
            .serialize(&classifier())
            .unwrap();
        let restored: DummyClassifier = NativeSerializer::new().deserialize(&bytes).unwrap();
        assert_eq!(restored, classifier());
    }

    #[test]
    fn test_native_empty_is_empty_data() {
        let result: Result<DummyClassifier> = NativeSerializer::new().deserialize(&[]);
        assert!(matches!(result, Err(StowError::EmptyData(_))));
    }

    #[test]
    fn test_native_rejects_foreign_type_tag() {
        let serializer = NativeSerializer::new().with_type_check(true);
        let bytes = serializer.serialize(&classifier()).unwrap();

        let result: Result<OtherModel> = serializer.deserialize(&bytes);
        match result {
            Err(StowError::CorruptData(msg)) => assert!(msg.contains("unknown type tag")),
            other => panic!("expected corrupt data, got {other:?}"),
        }
    }

    mod before_move {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        pub struct Classifier {
            pub weights: Vec<f64>,
        }
    }

    mod after_move {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        pub struct Classifier {
            pub weights: Vec<f64>,
        }
    }

    #[test]
    fn test_native_loads_across_module_moves() {
        let serializer = NativeSerializer::new();
        let bytes = serializer
            .serialize(&before_move::Classifier {
                weights: vec![0.5, 0.5],
            })
            .unwrap();

        let moved: after_move::Classifier = serializer.deserialize(&bytes).unwrap();
        assert_eq!(moved.weights, vec![0.5, 0.5]);

        let strict = NativeSerializer::new().with_type_check(true);
        let result: Result<after_move::Classifier> = strict.deserialize(&bytes);
        assert!(matches!(result, Err(StowError::CorruptData(_))));
    }

    #[test]
    fn test_native_loads_untyped_value_as_struct() {
        let serializer = NativeSerializer::new();
        let value = serde_json::to_value(classifier()).unwrap();
        let bytes = serializer.serialize(&value).unwrap();

        let restored: DummyClassifier = serializer.deserialize(&bytes).unwrap();
        assert_eq!(restored, classifier());
    }

    #[test]
    fn test_native_shape_mismatch_is_corrupt() {
        let serializer = NativeSerializer::new();
        let bytes = serializer.serialize(&vec![1_u8, 2, 3]).unwrap();

        let result: Result<DummyClassifier> = serializer.deserialize(&bytes);
        match result {
            Err(StowError::CorruptData(msg)) => assert!(msg.contains("does not decode")),
            other => panic!("expected corrupt data, got {other:?}"),
        }
    }

    #[test]
    fn test_native_rejects_plain_json() {
        let result: Result<DummyClassifier> =
            NativeSerializer::new().deserialize(br#"{"strategy":"prior","priors":{}}"#);
        assert!(matches!(result, Err(StowError::CorruptData(_))));
    }

    #[test]
    fn test_native_detects_flipped_bytes() {
        let serializer = NativeSerializer::new();
        let bytes = serializer.serialize(&classifier()).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let mut damaged = bytes.clone();
            let index = rng.gen_range(0..damaged.len());
            damaged[index] ^= rng.gen_range(1..=255u8);

            // Flips inside the header JSON may land on an ignorable byte such
            // as the timestamp, so only require that nothing wrong decodes.
            match serializer.deserialize::<DummyClassifier>(&damaged) {
                Ok(model) => assert_eq!(model, classifier()),
                Err(err) => assert!(
                    matches!(err, StowError::CorruptData(_)),
                    "unexpected error {err:?}"
                ),
            }
        }
    }

    #[test]
    fn test_native_refuses_payload_larger_than_header_claims() {
        let claimed = b"[1,2,3]";
        let payload = GzipCompressor::max().compress(&vec![b' '; 1 << 20]).unwrap();
        let header = EnvelopeHeader::new("Vec<u8>")
            .with_content_hash(claimed)
            .with_compression_algorithm("gzip")
            .with_payload_size(payload.len());
        let bytes = envelope::encode(&header, &payload).unwrap();

        match NativeSerializer::new().deserialize::<Vec<u8>>(&bytes) {
            Err(StowError::CorruptData(msg)) => assert!(msg.contains("exceeds")),
            other => panic!("expected corrupt data, got {other:?}"),
        }
    }

    #[test]
    fn test_inspect_reports_header() {
        let bytes = NativeSerializer::new().serialize(&classifier()).unwrap();
        let header = NativeSerializer::inspect(&bytes).unwrap();

        assert!(header.type_tag.ends_with("DummyClassifier"));
        assert_eq!(header.compression_algorithm, "gzip");
        assert!(header.uncompressed_size > 0);
    }

    #[test]
    fn test_decode_untyped_ignores_type_tag() {
        let bytes = NativeSerializer::new().serialize(&classifier()).unwrap();
        let (header, value) = NativeSerializer::decode_untyped(&bytes).unwrap();

        assert!(header.type_tag.ends_with("DummyClassifier"));
        assert_eq!(value["strategy"], "prior");
        assert_eq!(value["priors"]["ham"], 0.7);
    }

    #[test]
    fn test_json_serializer() {
        let serializer = JsonSerializer::pretty();
        let bytes = serializer.serialize(&classifier()).unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().contains('\n'));

        let restored: DummyClassifier = serializer.deserialize(&bytes).unwrap();
        assert_eq!(restored, classifier());

        assert!(matches!(
            serializer.deserialize::<DummyClassifier>(b""),
            Err(StowError::EmptyData(_))
        ));
        assert!(matches!(
            serializer.deserialize::<DummyClassifier>(b"{not json"),
            Err(StowError::CorruptData(_))
        ));
    }
}

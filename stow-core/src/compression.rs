/*!
Compression adapters for serialized payloads.

The native serializer compresses the encoded object before framing it. The
algorithm name is written into the envelope header so the reader can pick the
matching adapter with [`compressor_for`].
*/

use crate::{Result, StowError};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Compression abstraction for payload bytes
pub trait CompressionAdapter: Send + Sync {
    /// Compress the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress the input data, failing once the output would exceed
    /// `limit` bytes
    fn decompress(&self, compressed_data: &[u8], limit: usize) -> Result<Vec<u8>>;

    /// Name recorded in the envelope header
    fn algorithm_name(&self) -> &str;
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use stow_core::compression::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = b"model weights model weights model weights";
/// let compressed = compressor.compress(data)?;
/// let decompressed = compressor.decompress(&compressed, data.len())?;
/// assert_eq!(data, &decompressed[..]);
/// # Ok::<(), stow_core::StowError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a new gzip compressor with the specified level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(9)),
        }
    }

    /// Create a compressor for fast compression (level 1)
    pub fn fast() -> Self {
        Self::with_level(1)
    }

    /// Create a compressor for maximum compression (level 9)
    pub fn max() -> Self {
        Self::with_level(9)
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            StowError::compression(format!("Failed to write data for compression: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| StowError::compression(format!("Failed to finish compression: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8], limit: usize) -> Result<Vec<u8>> {
        // One byte past the limit is enough to tell an oversized payload apart
        let mut decoder = GzDecoder::new(compressed_data).take(limit as u64 + 1);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| StowError::compression(format!("Failed to decompress data: {e}")))?;

        check_limit(decompressed.len(), limit)?;
        Ok(decompressed)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

/// Pass-through adapter, for payloads that are already compact or tests
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8], limit: usize) -> Result<Vec<u8>> {
        check_limit(compressed_data.len(), limit)?;
        Ok(compressed_data.to_vec())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }
}

fn check_limit(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(StowError::compression(format!(
            "decompressed data exceeds the expected {limit} bytes"
        )));
    }
    Ok(())
}

/// Look up the adapter able to decompress payloads tagged with `name`
pub fn compressor_for(name: &str) -> Option<Box<dyn CompressionAdapter>> {
    match name {
        "gzip" => Some(Box::new(GzipCompressor::new())),
        "none" => Some(Box::new(NoCompression::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_compression_roundtrip() {
        let compressor = GzipCompressor::new();
        let original_data = b"coefficients 0.25 0.25 0.25 0.25 ".repeat(10);

        let compressed = compressor.compress(&original_data).unwrap();
        assert!(compressed.len() < original_data.len());

        let decompressed = compressor.decompress(&compressed, original_data.len()).unwrap();
        assert_eq!(original_data, decompressed);
    }

    #[test]
    fn test_gzip_compression_levels() {
        let test_data = b"Some model state to compress with different levels".repeat(20);

        let fast = GzipCompressor::fast();
        let max = GzipCompressor::max();

        let fast_compressed = fast.compress(&test_data).unwrap();
        let max_compressed = max.compress(&test_data).unwrap();

        assert!(max_compressed.len() <= fast_compressed.len());
        assert_eq!(fast.decompress(&fast_compressed, test_data.len()).unwrap(), test_data);
        assert_eq!(max.decompress(&max_compressed, test_data.len()).unwrap(), test_data);
    }

    #[test]
    fn test_no_compression() {
        let compressor = NoCompression::new();
        let test_data = b"test data";

        let compressed = compressor.compress(test_data).unwrap();
        assert_eq!(compressed, test_data);
        assert_eq!(compressor.decompress(&compressed, test_data.len()).unwrap(), test_data);
        assert_eq!(compressor.algorithm_name(), "none");
    }

    #[test]
    fn test_gzip_invalid_compressed_data() {
        let compressor = GzipCompressor::new();
        let result = compressor.decompress(b"this is not compressed gzip data", 1024);
        assert!(matches!(result, Err(StowError::Compression(_))));
    }

    #[test]
    fn test_decompression_stops_at_limit() {
        let compressor = GzipCompressor::max();
        // A megabyte of zeros shrinks to about a kilobyte
        let inflated = vec![0_u8; 1 << 20];
        let compressed = compressor.compress(&inflated).unwrap();
        assert!(compressed.len() < 4096);

        let err = compressor.decompress(&compressed, 4096).unwrap_err();
        assert!(matches!(err, StowError::Compression(_)));
        assert!(err.to_string().contains("exceeds"));

        assert_eq!(
            compressor.decompress(&compressed, inflated.len()).unwrap().len(),
            inflated.len()
        );
        assert!(NoCompression::new().decompress(b"12345", 4).is_err());
    }

    #[test]
    fn test_compressor_lookup() {
        assert_eq!(compressor_for("gzip").unwrap().algorithm_name(), "gzip");
        assert_eq!(compressor_for("none").unwrap().algorithm_name(), "none");
        assert!(compressor_for("zstd").is_none());
    }
}

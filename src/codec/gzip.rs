//! Gzip codec for the `encoding` / `accept_encoding` negotiation.
//!
//! Decompression is bounded so a small compressed frame cannot expand past
//! the configured frame limit.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{BertletError, Result};

/// Gzip codec.
pub struct GzipCodec;

impl GzipCodec {
    /// Gzip-compress `data` at the default level.
    pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| BertletError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| BertletError::Compression(e.to_string()))
    }

    /// Decompress a gzip stream, failing if the output would exceed `limit` bytes.
    pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut decoder = GzDecoder::new(data).take(limit as u64 + 1);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| BertletError::Compression(e.to_string()))?;
        if out.len() > limit {
            return Err(BertletError::Compression(format!(
                "decompressed size exceeds {limit} bytes"
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let data = b"abcabcabc".repeat(500);
        let compressed = GzipCodec::compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        // gzip magic
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        assert_eq!(GzipCodec::decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_decompress_limit() {
        let data = vec![0u8; 10_000];
        let compressed = GzipCodec::compress(&data).unwrap();
        let err = GzipCodec::decompress(&compressed, 9_999).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_decompress_garbage() {
        assert!(GzipCodec::decompress(b"not gzip at all", 1024).is_err());
    }
}

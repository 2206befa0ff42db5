//! Per-block compression.
//!
//! The codec id is stored in every block trailer, so tables written under a
//! different configuration (or a mix, after an options change) stay
//! readable.

use crate::error::{Error, Result};

/// Compression codec identifiers, one byte per block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0x00,
    Lz4 = 0x01,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Option<CompressionType> {
        match byte {
            0x00 => Some(CompressionType::None),
            0x01 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

/// Compress a block, falling back to no compression when it doesn't pay.
/// Returns the bytes to store and the codec actually used.
pub fn compress_block(data: &[u8], requested: CompressionType) -> (Vec<u8>, CompressionType) {
    match requested {
        CompressionType::None => (data.to_vec(), CompressionType::None),
        CompressionType::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(data);
            if compressed.len() < data.len() {
                (compressed, CompressionType::Lz4)
            } else {
                (data.to_vec(), CompressionType::None)
            }
        }
    }
}

/// Decompress a block according to its stored codec id.
pub fn decompress_block(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| Error::Corruption(format!("lz4 decompression failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_lz4() {
        let data: Vec<u8> = b"abcdefgh".repeat(512);
        let (stored, codec) = compress_block(&data, CompressionType::Lz4);
        assert_eq!(codec, CompressionType::Lz4);
        assert!(stored.len() < data.len());
        assert_eq!(decompress_block(&stored, codec).unwrap(), data);
    }

    #[test]
    fn incompressible_falls_back_to_none() {
        // High-entropy input: lz4 output is larger, so the block is stored raw.
        let data: Vec<u8> = (0..=255u8).cycle().take(300).scan(7u8, |s, b| {
            *s = s.wrapping_mul(31).wrapping_add(b);
            Some(*s)
        }).collect();
        let (stored, codec) = compress_block(&data, CompressionType::Lz4);
        if codec == CompressionType::None {
            assert_eq!(stored, data);
        }
        assert_eq!(decompress_block(&stored, codec).unwrap(), data);
    }

    #[test]
    fn corrupt_lz4_reports_corruption() {
        let err = decompress_block(&[0xde, 0xad], CompressionType::Lz4).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }
}

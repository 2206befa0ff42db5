use crate::encoding::{get_varint64, put_varint64};
use crate::error::{Error, Result};

/// Magic number identifying sorted-table files ("STRATSST").
pub const TABLE_MAGIC: u64 = 0x5354_5241_5453_5354;

/// Size of the per-block trailer: codec id (1B) + CRC (4B).
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Location of a block within the table file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the stored block in bytes, excluding the trailer.
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> BlockHandle {
        BlockHandle { offset, size }
    }

    /// Varint encoding, used as the value of index-block entries.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        put_varint64(&mut buf, self.offset);
        put_varint64(&mut buf, self.size);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<BlockHandle> {
        let (offset, consumed) = get_varint64(data)?;
        let (size, _) = get_varint64(&data[consumed..])?;
        Ok(BlockHandle { offset, size })
    }
}

/// The footer sits at the end of the table file and tells the reader where
/// to find the filter and index blocks.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Filter block offset (8B)             │
/// │ Filter block size (8B, 0 = none)     │
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct Footer {
    pub filter_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 8 * 5; // 40 bytes

    /// Encode footer to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.filter_handle.offset.to_le_bytes());
        buf.extend_from_slice(&self.filter_handle.size.to_le_bytes());
        buf.extend_from_slice(&self.index_handle.offset.to_le_bytes());
        buf.extend_from_slice(&self.index_handle.size.to_le_bytes());
        buf.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        buf
    }

    /// Decode footer from bytes, validating the magic number.
    pub fn decode(data: &[u8]) -> Result<Footer> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic = u64::from_le_bytes(data[32..40].try_into().unwrap());
        if magic != TABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad table magic: expected {TABLE_MAGIC:#x}, got {magic:#x}"
            )));
        }
        Ok(Footer {
            filter_handle: BlockHandle {
                offset: u64::from_le_bytes(data[0..8].try_into().unwrap()),
                size: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            },
            index_handle: BlockHandle {
                offset: u64::from_le_bytes(data[16..24].try_into().unwrap()),
                size: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip() {
        let footer = Footer {
            filter_handle: BlockHandle::new(4096, 512),
            index_handle: BlockHandle::new(4608, 128),
        };
        let encoded = footer.encode();
        assert_eq!(encoded.len(), Footer::SIZE);
        let decoded = Footer::decode(&encoded).unwrap();
        assert_eq!(decoded.filter_handle, footer.filter_handle);
        assert_eq!(decoded.index_handle, footer.index_handle);
    }

    #[test]
    fn footer_bad_magic() {
        let mut encoded = Footer {
            filter_handle: BlockHandle::default(),
            index_handle: BlockHandle::default(),
        }
        .encode();
        encoded[32] = 0xFF;
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn footer_too_short() {
        assert!(Footer::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn block_handle_roundtrip() {
        let handle = BlockHandle::new(1 << 40, 4096);
        let decoded = BlockHandle::decode(&handle.encode()).unwrap();
        assert_eq!(decoded, handle);
    }
}

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::cache::BlockCache;
use crate::comparator::InternalKeyComparator;
use crate::compress::{CompressionType, decompress_block};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::builder::TableOptions;
use crate::sstable::footer::{BLOCK_TRAILER_SIZE, BlockHandle, Footer};
use crate::sstable::iterator::TableIterator;
use crate::types::extract_user_key;

/// An opened sorted-table file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last 40 bytes) → filter and index block positions
/// 2. Read, verify and parse the index block
/// 3. Read and deserialize the bloom filter, if present
/// 4. Ready for queries — data blocks are read on demand, through the
///    block cache when one is attached
///
/// Shared across threads behind `Arc`; the file handle sits behind a
/// mutex so concurrent reads serialize only on the seek+read pair.
pub struct Table {
    file: Mutex<File>,
    file_number: u64,
    file_size: u64,
    icmp: InternalKeyComparator,
    index: Arc<Block>,
    filter: Option<BloomFilter>,
    block_cache: Option<Arc<BlockCache>>,
    verify_checksums: bool,
}

impl Table {
    /// Open a table file, reading footer, index and filter eagerly.
    pub fn open(
        path: &Path,
        file_number: u64,
        icmp: InternalKeyComparator,
        opts: TableOptions,
        block_cache: Option<Arc<BlockCache>>,
    ) -> Result<Table> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "table {} too short for footer",
                path.display()
            )));
        }
        file.seek(SeekFrom::Start(file_size - Footer::SIZE as u64))?;
        let mut footer_buf = vec![0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_data = read_block_at(&mut file, footer.index_handle, true)?;
        let index = Arc::new(Block::new(index_data)?);

        let filter = if footer.filter_handle.size > 0 {
            let raw = read_block_at(&mut file, footer.filter_handle, true)?;
            Some(BloomFilter::decode(&raw)?)
        } else {
            None
        };

        Ok(Table {
            file: Mutex::new(file),
            file_number,
            file_size,
            icmp,
            index,
            filter,
            block_cache,
            verify_checksums: opts.verify_checksums,
        })
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Fetch one data block, consulting the block cache first.
    pub(crate) fn read_block(&self, handle: BlockHandle) -> Result<Arc<Block>> {
        if let Some(cache) = &self.block_cache {
            if let Some(block) = cache.get(self.file_number, handle.offset) {
                return Ok(block);
            }
        }
        let data = {
            let mut file = self.file.lock();
            read_block_at(&mut file, handle, self.verify_checksums)?
        };
        let block = Arc::new(Block::new(data)?);
        if let Some(cache) = &self.block_cache {
            cache.insert(self.file_number, handle.offset, Arc::clone(&block));
        }
        Ok(block)
    }

    /// Point lookup: the first entry with internal key >= `target`, if it
    /// lives in this table. The caller decides whether the entry's user
    /// key actually matches and how to interpret its tag.
    pub fn get(&self, target: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if let Some(filter) = &self.filter {
            if !filter.may_contain(extract_user_key(target)) {
                return Ok(None);
            }
        }
        let mut index_iter = self.index.iter(self.icmp.clone());
        index_iter.seek(target)?;
        if !index_iter.is_valid() {
            return Ok(None);
        }
        let handle = BlockHandle::decode(index_iter.value())?;
        let block = self.read_block(handle)?;
        let mut block_iter = block.iter(self.icmp.clone());
        block_iter.seek(target)?;
        if !block_iter.is_valid() {
            return Ok(None);
        }
        Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())))
    }

    /// Iterator over every entry in the table, in internal-key order.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator::new(Arc::clone(self))
    }

    pub(crate) fn index_iter(&self) -> BlockIterator {
        self.index.iter(self.icmp.clone())
    }

    pub(crate) fn comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// Approximate byte offset within the file where `target` would live.
    /// Used for approximate-size-by-range accounting.
    pub fn approximate_offset_of(&self, target: &[u8]) -> u64 {
        let mut index_iter = self.index.iter(self.icmp.clone());
        if index_iter.seek(target).is_ok() && index_iter.is_valid() {
            if let Ok(handle) = BlockHandle::decode(index_iter.value()) {
                return handle.offset;
            }
        }
        // Past the last block: everything but the footer precedes it.
        self.file_size.saturating_sub(Footer::SIZE as u64)
    }
}

/// Read a stored block plus trailer straight from the file, verify its
/// CRC and decompress per the stored codec id.
///
/// A checksum mismatch is a fatal read error for this table; it is never
/// silently ignored (only explicitly disabled verification skips it).
fn read_block_at(file: &mut File, handle: BlockHandle, verify: bool) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; handle.size as usize + BLOCK_TRAILER_SIZE];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut buf)?;

    let stored = &buf[..handle.size as usize];
    let codec_byte = buf[handle.size as usize];
    let stored_crc = u32::from_le_bytes(buf[handle.size as usize + 1..].try_into().unwrap());

    if verify {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(stored);
        hasher.update(&[codec_byte]);
        if hasher.finalize() != stored_crc {
            return Err(Error::Corruption(format!(
                "block checksum mismatch at offset {}",
                handle.offset
            )));
        }
    }
    let codec = CompressionType::from_u8(codec_byte)
        .ok_or_else(|| Error::Corruption(format!("unknown block codec id {codec_byte}")))?;
    decompress_block(stored, codec)
}

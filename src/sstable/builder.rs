use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::bloom::builder::BloomFilterBuilder;
use crate::comparator::InternalKeyComparator;
use crate::compress::{CompressionType, compress_block};
use crate::error::Result;
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{BLOCK_TRAILER_SIZE, BlockHandle, Footer};
use crate::types::extract_user_key;

/// Knobs for building and reading sorted tables, extracted from the
/// database options.
#[derive(Clone)]
pub struct TableOptions {
    /// Target uncompressed size of a data block.
    pub block_size: usize,
    /// Entries between prefix-compression restart points.
    pub block_restart_interval: usize,
    /// Codec requested for new blocks (stored per block).
    pub compression: CompressionType,
    /// Bloom filter budget; 0 disables the filter block.
    pub bits_per_key: usize,
    /// Verify block CRCs on read.
    pub verify_checksums: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::Lz4,
            bits_per_key: 0,
            verify_checksums: true,
        }
    }
}

/// Summary of a finished table, used to register it in the manifest.
#[derive(Debug, Clone)]
pub struct TableSummary {
    pub file_size: u64,
    pub num_entries: u64,
    /// Smallest encoded internal key, set when at least one entry exists.
    pub smallest: Vec<u8>,
    /// Largest encoded internal key.
    pub largest: Vec<u8>,
}

/// Builds a sorted-table file from entries in strictly increasing
/// internal-key order.
///
/// Used during memtable flush (sorted memtable → table) and compaction
/// (merged iterator → new tables).
///
/// Build process:
/// 1. Entries pack into the current data block
/// 2. When the block reaches the target size it's compressed, checksummed
///    and appended; the sparse index gains one entry keyed by the shortest
///    separator between this block's last key and the next block's first
/// 3. finish() writes the filter block, index block and footer, then fsyncs
pub struct TableBuilder {
    writer: BufWriter<File>,
    icmp: InternalKeyComparator,
    opts: TableOptions,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter: Option<BloomFilterBuilder>,
    /// Handle of the last flushed data block, awaiting its index entry.
    pending_handle: Option<BlockHandle>,
    offset: u64,
    num_entries: u64,
    smallest: Option<Vec<u8>>,
    last_key: Vec<u8>,
}

impl TableBuilder {
    /// Start building a table at `path`, truncating any existing file.
    pub fn new(path: &Path, icmp: InternalKeyComparator, opts: TableOptions) -> Result<TableBuilder> {
        let file = File::create(path)?;
        let filter = (opts.bits_per_key > 0).then(|| BloomFilterBuilder::new(opts.bits_per_key));
        Ok(TableBuilder {
            writer: BufWriter::new(file),
            icmp,
            data_block: BlockBuilder::new(opts.block_restart_interval),
            // The index is searched, never scanned; restart every entry.
            index_block: BlockBuilder::new(1),
            filter,
            opts,
            pending_handle: None,
            offset: 0,
            num_entries: 0,
            smallest: None,
            last_key: Vec::new(),
        })
    }

    /// Add an entry. MUST be called in strictly increasing internal-key
    /// order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(
            self.num_entries == 0 || self.icmp.compare(&self.last_key, key).is_lt(),
            "table entries out of order"
        );

        // The index entry for the previous block is keyed by a separator
        // computed once the next block's first key is known.
        if let Some(handle) = self.pending_handle.take() {
            let separator = self.icmp.find_shortest_separator(&self.last_key, key);
            self.index_block.add(&separator, &handle.encode());
        }

        if let Some(filter) = self.filter.as_mut() {
            filter.add_key(extract_user_key(key));
        }
        if self.smallest.is_none() {
            self.smallest = Some(key.to_vec());
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.size_estimate() >= self.opts.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Compress, checksum and append the current data block.
    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let block = std::mem::replace(
            &mut self.data_block,
            BlockBuilder::new(self.opts.block_restart_interval),
        );
        let handle = self.write_block(&block.finish(), self.opts.compression)?;
        self.pending_handle = Some(handle);
        Ok(())
    }

    /// Write one block plus its `[codec][crc]` trailer, returning where it
    /// landed.
    fn write_block(&mut self, contents: &[u8], requested: CompressionType) -> Result<BlockHandle> {
        let (stored, codec) = compress_block(contents, requested);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&stored);
        hasher.update(&[codec as u8]);
        let crc = hasher.finalize();

        self.writer.write_all(&stored)?;
        self.writer.write_all(&[codec as u8])?;
        self.writer.write_all(&crc.to_le_bytes())?;

        let handle = BlockHandle::new(self.offset, stored.len() as u64);
        self.offset += stored.len() as u64 + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Number of entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far (used to split compaction outputs).
    pub fn file_size_estimate(&self) -> u64 {
        self.offset + self.data_block.size_estimate() as u64
    }

    /// Finalize: flush the last data block, write filter, index and
    /// footer, fsync.
    pub fn finish(mut self) -> Result<TableSummary> {
        self.flush_data_block()?;

        // Filter block, stored raw: its own bytes are already dense.
        let filter_handle = match self.filter.take() {
            Some(builder) if !builder.is_empty() => {
                let filter = builder.build();
                self.write_block(&filter.encode(), CompressionType::None)?
            }
            _ => BlockHandle::default(),
        };

        // Final index entry: a short key past everything in the table.
        if let Some(handle) = self.pending_handle.take() {
            let successor = self.icmp.find_short_successor(&self.last_key);
            self.index_block.add(&successor, &handle.encode());
        }
        let index_contents = std::mem::replace(&mut self.index_block, BlockBuilder::new(1)).finish();
        let index_handle = self.write_block(&index_contents, self.opts.compression)?;

        let footer = Footer {
            filter_handle,
            index_handle,
        };
        self.writer.write_all(&footer.encode())?;
        self.offset += Footer::SIZE as u64;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(TableSummary {
            file_size: self.offset,
            num_entries: self.num_entries,
            smallest: self.smallest.unwrap_or_default(),
            largest: self.last_key,
        })
    }
}

//! In-memory caches for the read path.
//!
//! Two LRU caches sit between the engine and the filesystem: decoded data
//! blocks (bounded by a byte budget) and open table handles (bounded by
//! `max_open_files`). Evicting a table handle closes its file descriptor,
//! which is how the engine degrades gracefully when descriptors run short.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::comparator::InternalKeyComparator;
use crate::error::Result;
use crate::filenames;
use crate::sstable::block::Block;
use crate::sstable::builder::TableOptions;
use crate::sstable::reader::Table;

/// Cache of decompressed, checksum-verified blocks, keyed by
/// (table file number, block offset).
pub struct BlockCache {
    blocks: Mutex<LruCache<(u64, u64), Arc<Block>>>,
}

impl BlockCache {
    /// Build a cache holding roughly `capacity_bytes` of blocks of the
    /// configured size.
    pub fn new(capacity_bytes: u64, block_size: usize) -> BlockCache {
        let entries = (capacity_bytes as usize / block_size.max(1)).max(16);
        BlockCache {
            blocks: Mutex::new(LruCache::new(NonZeroUsize::new(entries).unwrap())),
        }
    }

    pub fn get(&self, file_number: u64, offset: u64) -> Option<Arc<Block>> {
        self.blocks.lock().get(&(file_number, offset)).cloned()
    }

    pub fn insert(&self, file_number: u64, offset: u64, block: Arc<Block>) {
        self.blocks.lock().put((file_number, offset), block);
    }

    /// Drop every cached block belonging to a deleted table.
    pub fn evict_file(&self, file_number: u64) {
        let mut blocks = self.blocks.lock();
        let stale: Vec<(u64, u64)> = blocks
            .iter()
            .map(|(k, _)| *k)
            .filter(|(file, _)| *file == file_number)
            .collect();
        for key in stale {
            blocks.pop(&key);
        }
    }
}

/// Cache of open table handles, keyed by file number.
///
/// Opening a table reads its footer, index and filter; keeping handles
/// warm makes point lookups one block read. The LRU bound doubles as the
/// open-file-descriptor budget.
pub struct TableCache {
    dir: PathBuf,
    icmp: InternalKeyComparator,
    opts: TableOptions,
    block_cache: Arc<BlockCache>,
    tables: Mutex<LruCache<u64, Arc<Table>>>,
}

impl TableCache {
    pub fn new(
        dir: &Path,
        icmp: InternalKeyComparator,
        opts: TableOptions,
        block_cache: Arc<BlockCache>,
        max_open_files: usize,
    ) -> TableCache {
        TableCache {
            dir: dir.to_path_buf(),
            icmp,
            opts,
            block_cache: Arc::clone(&block_cache),
            tables: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_open_files.max(16)).unwrap(),
            )),
        }
    }

    /// Fetch an open handle, opening (and caching) the file on a miss.
    pub fn get_table(&self, file_number: u64) -> Result<Arc<Table>> {
        if let Some(table) = self.tables.lock().get(&file_number).cloned() {
            return Ok(table);
        }
        let path = filenames::table_file(&self.dir, file_number);
        let table = Arc::new(Table::open(
            &path,
            file_number,
            self.icmp.clone(),
            self.opts.clone(),
            Some(Arc::clone(&self.block_cache)),
        )?);
        self.tables.lock().put(file_number, Arc::clone(&table));
        Ok(table)
    }

    /// Forget a deleted table: close its handle and drop its blocks.
    pub fn evict(&self, file_number: u64) {
        self.tables.lock().pop(&file_number);
        self.block_cache.evict_file(file_number);
    }
}

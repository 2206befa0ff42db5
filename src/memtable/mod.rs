pub mod skiplist;

use std::sync::Arc;

use parking_lot::RwLock;

use skiplist::SkipList;

use crate::comparator::InternalKeyComparator;
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{InternalKey, SequenceNumber, VALUE_TYPE_FOR_SEEK, ValueType, split_internal_key};

/// Outcome of a memtable (or table) point lookup.
///
/// Distinguished from `Option<Vec<u8>>` because a tombstone in a newer
/// source must mask any value in older sources: found-but-deleted stops
/// the search, not-found continues it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// Key found with this value.
    Found(Vec<u8>),
    /// Key has been explicitly deleted (tombstone found).
    Deleted,
}

/// In-memory sorted buffer for writes. Wraps a SkipList keyed by encoded
/// internal key.
///
/// Every write goes here first. When size exceeds the write-buffer
/// threshold, the memtable is frozen (becomes immutable) and flushed to a
/// sorted table; it stays readable for in-flight snapshots until the flush
/// commits to the manifest.
///
/// Single-writer/multi-reader: the list sits behind an RwLock. Readers
/// (gets and iterator steps) take the read lock briefly and copy out the
/// entry they need, so no lock is ever held across calls.
pub struct MemTable {
    list: RwLock<SkipList>,
    cmp: InternalKeyComparator,
}

impl MemTable {
    pub fn new(cmp: InternalKeyComparator) -> MemTable {
        MemTable {
            list: RwLock::new(SkipList::new(cmp.clone())),
            cmp,
        }
    }

    /// Insert an entry under its assigned sequence number. Tombstones
    /// carry an empty value.
    pub fn add(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        user_key: &[u8],
        value: &[u8],
    ) {
        let key = InternalKey::new(user_key, sequence, value_type).encode();
        self.list.write().insert(key, value.to_vec());
    }

    /// Look up the newest version of `user_key` visible at
    /// `sequence_ceiling`. Returns None when this memtable holds no
    /// visible version (the caller continues to older sources).
    pub fn get(&self, user_key: &[u8], sequence_ceiling: SequenceNumber) -> Option<LookupResult> {
        let target = InternalKey::new(user_key, sequence_ceiling, VALUE_TYPE_FOR_SEEK).encode();
        let list = self.list.read();
        let (found_key, found_value) = list.seek(&target)?;
        let (found_user, _, value_type) = split_internal_key(found_key)?;
        if self
            .cmp
            .user_comparator()
            .compare(found_user, user_key)
            .is_ne()
        {
            return None;
        }
        match value_type {
            ValueType::Value => Some(LookupResult::Found(found_value.to_vec())),
            ValueType::Deletion => Some(LookupResult::Deleted),
        }
    }

    /// Approximate memory usage in bytes.
    pub fn approximate_size(&self) -> usize {
        self.list.read().size_bytes()
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Iterator over all entries (including tombstones) in internal-key
    /// order. The iterator shares ownership of the memtable, so it stays
    /// usable after the table is frozen and queued for flush.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: Arc::clone(self),
            current: None,
        }
    }
}

/// Cursor over a memtable.
///
/// Holds no lock between calls: each step re-seeks from the owned cursor
/// key under a short read lock. The skip list is insert-only, so entries
/// never move; concurrent inserts may become visible mid-iteration but are
/// filtered out by the snapshot ceiling above this layer.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    /// Owned copy of the current entry: (encoded internal key, value).
    current: Option<(Vec<u8>, Vec<u8>)>,
}

fn to_owned_entry(entry: Option<(&[u8], &[u8])>) -> Option<(Vec<u8>, Vec<u8>)> {
    entry.map(|(k, v)| (k.to_vec(), v.to_vec()))
}

impl StorageIterator for MemTableIterator {
    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not positioned").0
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not positioned").1
    }

    fn next(&mut self) -> Result<()> {
        let cursor = self.current.take().expect("iterator not positioned").0;
        self.current = to_owned_entry(self.mem.list.read().seek_after(&cursor));
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let cursor = self.current.take().expect("iterator not positioned").0;
        self.current = to_owned_entry(self.mem.list.read().seek_before(&cursor));
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.current = to_owned_entry(self.mem.list.read().seek(target));
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.current = to_owned_entry(self.mem.list.read().first());
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.current = to_owned_entry(self.mem.list.read().last());
        Ok(())
    }
}

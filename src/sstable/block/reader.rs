use std::sync::Arc;

use crate::comparator::InternalKeyComparator;
use crate::encoding::get_varint32;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;

/// A decoded (decompressed, checksum-verified) block resident in memory.
///
/// Blocks are immutable and shared: the block cache and any number of
/// iterators hold the same `Arc<Block>`.
pub struct Block {
    data: Vec<u8>,
    /// Offset where the restart array begins (end of entry data).
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    /// Validate the trailer structure of a block.
    pub fn new(data: Vec<u8>) -> Result<Block> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too short for restart count".into()));
        }
        let num_restarts =
            u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as usize;
        let trailer = 4 * (num_restarts + 1);
        if num_restarts == 0 || trailer > data.len() {
            return Err(Error::Corruption("block restart array malformed".into()));
        }
        let restart_offset = data.len() - trailer;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts);
        let at = self.restart_offset + 4 * index;
        u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()) as usize
    }

    /// Uncompressed in-memory size, for cache accounting.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(self: &Arc<Self>, cmp: InternalKeyComparator) -> BlockIterator {
        BlockIterator {
            block: Arc::clone(self),
            cmp,
            current: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            valid: false,
        }
    }
}

/// Parsed entry header: (shared, non_shared, value_len, header bytes).
fn decode_entry_header(data: &[u8], offset: usize) -> Result<(usize, usize, usize, usize)> {
    let slice = data
        .get(offset..)
        .ok_or_else(|| Error::Corruption("block entry offset out of range".into()))?;
    let (shared, a) = get_varint32(slice)?;
    let (non_shared, b) = get_varint32(&slice[a..])?;
    let (value_len, c) = get_varint32(&slice[a + b..])?;
    let header = a + b + c;
    if offset + header + non_shared as usize + value_len as usize > data.len() {
        return Err(Error::Corruption("block entry overruns block".into()));
    }
    Ok((shared as usize, non_shared as usize, value_len as usize, header))
}

/// Cursor over one block's entries, bidirectional.
///
/// Forward movement is a linear decode; backward movement re-scans from
/// the restart point preceding the current entry, which the restart
/// interval keeps cheap.
pub struct BlockIterator {
    block: Arc<Block>,
    cmp: InternalKeyComparator,
    /// Offset of the current entry, == restart_offset when exhausted.
    current: usize,
    restart_index: usize,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    valid: bool,
}

impl BlockIterator {
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        self.current = self.block.restart_point(index);
        // Fake a zero-length value ending at the restart point so the next
        // parse starts there.
        self.value_offset = self.current;
        self.value_len = 0;
        self.valid = false;
    }

    /// Decode the entry at `next_entry_offset`. Returns false at end.
    fn parse_next_key(&mut self) -> Result<bool> {
        self.current = self.next_entry_offset();
        if self.current >= self.block.restart_offset {
            self.valid = false;
            self.restart_index = self.block.num_restarts;
            return Ok(false);
        }
        let (shared, non_shared, value_len, header) =
            decode_entry_header(&self.block.data, self.current)?;
        if shared > self.key.len() {
            self.valid = false;
            return Err(Error::Corruption("block entry shared-prefix mismatch".into()));
        }
        let key_start = self.current + header;
        self.key.truncate(shared);
        self.key
            .extend_from_slice(&self.block.data[key_start..key_start + non_shared]);
        self.value_offset = key_start + non_shared;
        self.value_len = value_len;
        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        self.valid = true;
        Ok(true)
    }

    /// Full key stored at a restart point (shared prefix must be zero).
    fn restart_key(&self, index: usize) -> Result<&[u8]> {
        let offset = self.block.restart_point(index);
        let (shared, non_shared, _, header) = decode_entry_header(&self.block.data, offset)?;
        if shared != 0 {
            return Err(Error::Corruption("restart entry has shared prefix".into()));
        }
        Ok(&self.block.data[offset + header..offset + header + non_shared])
    }
}

impl StorageIterator for BlockIterator {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid, "iterator not positioned");
        &self.key
    }

    fn value(&self) -> &[u8] {
        assert!(self.valid, "iterator not positioned");
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn next(&mut self) -> Result<()> {
        assert!(self.valid, "iterator not positioned");
        self.parse_next_key()?;
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        assert!(self.valid, "iterator not positioned");
        let original = self.current;
        // Back up to the restart point strictly before the current entry.
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // Stepped before the first entry.
                self.valid = false;
                self.current = self.block.restart_offset;
                self.restart_index = self.block.num_restarts;
                return Ok(());
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        // Scan forward until the entry just before `original`.
        loop {
            if !self.parse_next_key()? {
                break;
            }
            if self.next_entry_offset() >= original {
                break;
            }
        }
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        // Binary search the restart array for the last restart point with a
        // key < target.
        let mut left = 0usize;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            if self.cmp.compare(self.restart_key(mid)?, target).is_lt() {
                left = mid;
            } else {
                right = mid - 1;
            }
        }
        self.seek_to_restart_point(left);
        // Linear scan to the first entry >= target.
        loop {
            if !self.parse_next_key()? {
                return Ok(());
            }
            if self.cmp.compare(&self.key, target).is_ge() {
                return Ok(());
            }
        }
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.seek_to_restart_point(0);
        self.parse_next_key()?;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_key()? && self.next_entry_offset() < self.block.restart_offset {}
        Ok(())
    }
}

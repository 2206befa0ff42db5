use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::{MergeIterator, StorageIterator};
use crate::manifest::Version;
use crate::types::{InternalKey, SequenceNumber, VALUE_TYPE_FOR_SEEK, ValueType, split_internal_key};

/// Traversal state of a database iterator.
///
/// Forward: the merged cursor sits ON the current entry.
/// Reverse: the current entry is cached in `saved_key`/`saved_value` and
/// the merged cursor sits just BEFORE its run of versions. These two
/// invariants are what direction changes must re-establish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// User-facing bidirectional cursor over the whole store.
///
/// Wraps a [`MergeIterator`] over the memtables and every relevant table,
/// applies the snapshot's sequence ceiling, collapses versions so only
/// the newest visible one of each key surfaces, and hides tombstoned
/// keys. `key()`/`value()` are idempotent reads: they never move the
/// cursor, and repeated forward/backward pairs return to the same
/// position.
pub struct DbIterator {
    ucmp: Arc<dyn Comparator>,
    inner: MergeIterator,
    /// Snapshot ceiling: entries above it are invisible.
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    /// Pins the version (and so its table files) for the iterator's
    /// lifetime.
    _version: Arc<Version>,
}

impl DbIterator {
    pub(crate) fn new(
        ucmp: Arc<dyn Comparator>,
        inner: MergeIterator,
        sequence: SequenceNumber,
        version: Arc<Version>,
    ) -> DbIterator {
        DbIterator {
            ucmp,
            inner,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            _version: version,
        }
    }

    /// True while the cursor is on an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current user key. Requires a prior successful seek.
    pub fn key(&self) -> &[u8] {
        assert!(self.valid, "iterator not positioned");
        match self.direction {
            Direction::Forward => {
                split_internal_key(self.inner.key())
                    .expect("malformed internal key")
                    .0
            }
            Direction::Reverse => &self.saved_key,
        }
    }

    /// Current value. Requires a prior successful seek.
    pub fn value(&self) -> &[u8] {
        assert!(self.valid, "iterator not positioned");
        match self.direction {
            Direction::Forward => self.inner.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    /// Position at the first visible entry.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.inner.seek_to_first()?;
        if self.inner.is_valid() {
            self.find_next_user_entry(false)
        } else {
            self.valid = false;
            Ok(())
        }
    }

    /// Position at the last visible entry.
    pub fn seek_to_last(&mut self) -> Result<()> {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.inner.seek_to_last()?;
        self.find_prev_user_entry()
    }

    /// Position at the first visible entry with user key >= target.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.direction = Direction::Forward;
        self.saved_key.clear();
        self.saved_value.clear();
        let internal_target =
            InternalKey::new(target, self.sequence, VALUE_TYPE_FOR_SEEK).encode();
        self.inner.seek(&internal_target)?;
        if self.inner.is_valid() {
            self.find_next_user_entry(false)
        } else {
            self.valid = false;
            Ok(())
        }
    }

    /// Position at the last visible entry with user key <= target.
    pub fn seek_for_prev(&mut self, target: &[u8]) -> Result<()> {
        self.seek(target)?;
        if !self.valid {
            return self.seek_to_last();
        }
        if self.ucmp.compare(self.key(), target).is_gt() {
            return self.prev();
        }
        Ok(())
    }

    /// Advance to the next visible user key.
    pub fn next(&mut self) -> Result<()> {
        assert!(self.valid, "iterator not positioned");
        if self.direction == Direction::Reverse {
            // The merged cursor sits before the current entry's run;
            // saved_key already names the current user key to skip past.
            self.direction = Direction::Forward;
            if !self.inner.is_valid() {
                self.inner.seek_to_first()?;
            } else {
                self.inner.next()?;
            }
            if !self.inner.is_valid() {
                self.valid = false;
                self.saved_key.clear();
                return Ok(());
            }
        } else {
            let current = self
                .current_user_key()
                .ok_or_else(|| Error::Corruption("malformed internal key".into()))?;
            self.saved_key = current;
            self.inner.next()?;
            if !self.inner.is_valid() {
                self.valid = false;
                self.saved_key.clear();
                return Ok(());
            }
        }
        self.find_next_user_entry(true)
    }

    /// Step back to the previous visible user key.
    pub fn prev(&mut self) -> Result<()> {
        assert!(self.valid, "iterator not positioned");
        if self.direction == Direction::Forward {
            // Walk the merged cursor behind every version of the current
            // user key, then re-establish the reverse invariant.
            let current = self
                .current_user_key()
                .ok_or_else(|| Error::Corruption("malformed internal key".into()))?;
            self.saved_key = current;
            loop {
                self.inner.prev()?;
                if !self.inner.is_valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return Ok(());
                }
                let (user, _, _) = split_internal_key(self.inner.key())
                    .ok_or_else(|| Error::Corruption("malformed internal key".into()))?;
                if self.ucmp.compare(user, &self.saved_key).is_lt() {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()
    }

    fn current_user_key(&self) -> Option<Vec<u8>> {
        split_internal_key(self.inner.key()).map(|(user, _, _)| user.to_vec())
    }

    /// Scan forward to the newest visible, non-deleted entry of the next
    /// acceptable user key. With `skipping`, keys <= `saved_key` are
    /// hidden (already consumed, or masked by a tombstone).
    fn find_next_user_entry(&mut self, mut skipping: bool) -> Result<()> {
        loop {
            if !self.inner.is_valid() {
                break;
            }
            if let Some((user, sequence, value_type)) = split_internal_key(self.inner.key()) {
                if sequence <= self.sequence {
                    match value_type {
                        ValueType::Deletion => {
                            // Everything older with this user key is
                            // shadowed by the tombstone.
                            self.saved_key.clear();
                            self.saved_key.extend_from_slice(user);
                            skipping = true;
                        }
                        ValueType::Value => {
                            if skipping && self.ucmp.compare(user, &self.saved_key).is_le() {
                                // Hidden: an older version, or tombstoned.
                            } else {
                                self.valid = true;
                                self.saved_key.clear();
                                return Ok(());
                            }
                        }
                    }
                }
            }
            self.inner.next()?;
        }
        self.saved_key.clear();
        self.valid = false;
        Ok(())
    }

    /// Scan backward and cache the newest visible entry of the previous
    /// user key, leaving the merged cursor just before its run.
    fn find_prev_user_entry(&mut self) -> Result<()> {
        let mut value_type = ValueType::Deletion;
        while self.inner.is_valid() {
            if let Some((user, sequence, entry_type)) = split_internal_key(self.inner.key()) {
                if sequence <= self.sequence {
                    if value_type != ValueType::Deletion
                        && self.ucmp.compare(user, &self.saved_key).is_lt()
                    {
                        // Stepped onto an earlier user key: the cached
                        // entry is the answer.
                        break;
                    }
                    value_type = entry_type;
                    if value_type == ValueType::Deletion {
                        self.saved_key.clear();
                        self.saved_value.clear();
                    } else {
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(user);
                        self.saved_value.clear();
                        self.saved_value.extend_from_slice(self.inner.value());
                    }
                }
            }
            self.inner.prev()?;
        }
        if value_type == ValueType::Deletion {
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
        Ok(())
    }
}

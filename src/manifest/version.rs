use std::cmp::Ordering;
use std::sync::Arc;

use crate::cache::TableCache;
use crate::comparator::InternalKeyComparator;
use crate::error::Result;
use crate::manifest::NUM_LEVELS;
use crate::manifest::edit::FileMetaHandle;
use crate::memtable::LookupResult;
use crate::types::{InternalKey, SequenceNumber, VALUE_TYPE_FOR_SEEK, ValueType, split_internal_key};

/// Level 0 holds this many files before compaction is triggered.
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Byte budget for level 1; each deeper level gets 10x more.
const LEVEL1_MAX_BYTES: f64 = 10.0 * 1024.0 * 1024.0;

/// Size ceiling for a level.
pub fn max_bytes_for_level(level: usize) -> f64 {
    debug_assert!(level >= 1);
    let mut result = LEVEL1_MAX_BYTES;
    for _ in 1..level {
        result *= 10.0;
    }
    result
}

/// An immutable snapshot of which sorted tables exist at which level.
///
/// Versions are produced by applying a `VersionEdit` to the previous
/// version and are never mutated afterwards. Readers, iterators and
/// snapshots share them via `Arc`; a version's tables stay on disk until
/// no live version references them.
pub struct Version {
    pub(crate) icmp: InternalKeyComparator,
    /// Files per level. Level 0 is ordered newest-first (by file number);
    /// deeper levels are sorted by smallest key and never overlap.
    pub(crate) files: Vec<Vec<FileMetaHandle>>,
    /// Level most in need of compaction, with its urgency score.
    /// Computed once when the version is installed; >= 1.0 means "do it".
    pub(crate) compaction_level: usize,
    pub(crate) compaction_score: f64,
}

impl Version {
    pub fn empty(icmp: InternalKeyComparator) -> Version {
        Version {
            icmp,
            files: vec![Vec::new(); NUM_LEVELS],
            compaction_level: 0,
            compaction_score: 0.0,
        }
    }

    pub fn files(&self, level: usize) -> &[FileMetaHandle] {
        &self.files[level]
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files[level].iter().map(|f| f.file_size).sum()
    }

    /// Recompute which level most needs compaction. Level 0 scores by
    /// file count (overlapping tables degrade every point lookup);
    /// deeper levels score by bytes over their exponential budget.
    pub(crate) fn finalize(&mut self) {
        let mut best_level = 0;
        let mut best_score = self.files[0].len() as f64 / L0_COMPACTION_TRIGGER as f64;
        for level in 1..NUM_LEVELS - 1 {
            let score = self.level_bytes(level) as f64 / max_bytes_for_level(level);
            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }
        self.compaction_level = best_level;
        self.compaction_score = best_score;
    }

    fn user_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.icmp.user_comparator().compare(a, b)
    }

    fn file_could_contain(&self, file: &FileMetaHandle, user_key: &[u8]) -> bool {
        let smallest_user = user_key_of(&file.smallest);
        let largest_user = user_key_of(&file.largest);
        self.user_cmp(user_key, smallest_user).is_ge()
            && self.user_cmp(user_key, largest_user).is_le()
    }

    /// Look up the newest visible version of `user_key` at or below
    /// `sequence`. Searches level by level; the first level holding any
    /// visible version of the key is authoritative.
    pub fn get(
        &self,
        table_cache: &TableCache,
        user_key: &[u8],
        sequence: SequenceNumber,
    ) -> Result<Option<LookupResult>> {
        let target = InternalKey::new(user_key, sequence, VALUE_TYPE_FOR_SEEK).encode();

        // Level 0 files may overlap; every candidate must be consulted,
        // newest file first.
        for file in &self.files[0] {
            if !self.file_could_contain(file, user_key) {
                continue;
            }
            if let Some(result) = self.get_in_file(table_cache, file, &target, user_key)? {
                return Ok(Some(result));
            }
        }

        // Deeper levels never overlap: at most one candidate per level.
        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }
            // First file whose largest key is >= target.
            let index = files.partition_point(|f| self.icmp.compare(&f.largest, &target).is_lt());
            if index >= files.len() {
                continue;
            }
            let file = &files[index];
            if !self.file_could_contain(file, user_key) {
                continue;
            }
            if let Some(result) = self.get_in_file(table_cache, file, &target, user_key)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn get_in_file(
        &self,
        table_cache: &TableCache,
        file: &FileMetaHandle,
        target: &[u8],
        user_key: &[u8],
    ) -> Result<Option<LookupResult>> {
        let table = table_cache.get_table(file.number)?;
        let Some((found_key, found_value)) = table.get(target)? else {
            return Ok(None);
        };
        let Some((found_user, _, value_type)) = split_internal_key(&found_key) else {
            return Err(crate::error::Error::Corruption(format!(
                "malformed internal key in table {:06}",
                file.number
            )));
        };
        if self.user_cmp(found_user, user_key).is_ne() {
            return Ok(None);
        }
        Ok(Some(match value_type {
            ValueType::Value => LookupResult::Found(found_value),
            ValueType::Deletion => LookupResult::Deleted,
        }))
    }

    /// All files at `level` whose user-key range touches
    /// [`begin`, `end`] (either bound may be None = unbounded).
    ///
    /// At level 0 the search range grows to cover every transitively
    /// overlapping file, since level-0 files overlap each other.
    pub fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<FileMetaHandle> {
        let mut begin = begin.map(|b| b.to_vec());
        let mut end = end.map(|e| e.to_vec());
        let mut inputs: Vec<FileMetaHandle> = Vec::new();
        let mut index = 0;
        while index < self.files[level].len() {
            let file = &self.files[level][index];
            index += 1;
            let file_start = user_key_of(&file.smallest);
            let file_limit = user_key_of(&file.largest);
            if let Some(b) = &begin {
                if self.user_cmp(file_limit, b).is_lt() {
                    continue;
                }
            }
            if let Some(e) = &end {
                if self.user_cmp(file_start, e).is_gt() {
                    continue;
                }
            }
            inputs.push(Arc::clone(file));
            if level == 0 {
                // A level-0 file may widen the range; restart so every
                // transitively overlapping file is included.
                let mut widened = false;
                if let Some(b) = &begin {
                    if self.user_cmp(file_start, b).is_lt() {
                        begin = Some(file_start.to_vec());
                        widened = true;
                    }
                }
                if let Some(e) = &end {
                    if self.user_cmp(file_limit, e).is_gt() {
                        end = Some(file_limit.to_vec());
                        widened = true;
                    }
                }
                if widened {
                    inputs.clear();
                    index = 0;
                }
            }
        }
        inputs
    }

    /// Whether any file in levels deeper than `level` could hold
    /// `user_key`. Used to decide when a tombstone has nothing left to
    /// mask and may be dropped.
    pub fn is_base_level_for_key(&self, level: usize, user_key: &[u8]) -> bool {
        for deeper in level + 1..NUM_LEVELS {
            for file in &self.files[deeper] {
                if self.file_could_contain(file, user_key) {
                    return false;
                }
            }
        }
        true
    }

    /// Total count of table files across all levels.
    pub fn total_files(&self) -> usize {
        self.files.iter().map(|f| f.len()).sum()
    }
}

/// User-key part of an encoded internal key stored in file metadata.
pub(crate) fn user_key_of(internal_key: &[u8]) -> &[u8] {
    crate::types::extract_user_key(internal_key)
}

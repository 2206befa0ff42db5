//! Version / level manifest.
//!
//! The authoritative, atomically-updated description of which sorted
//! tables exist at which level. Every mutation of the file set — a flush
//! adding a table, a compaction swapping tables — is expressed as a
//! [`VersionEdit`], appended to the manifest log (which reuses the WAL
//! block format) and applied to produce a new immutable [`Version`].
//! The `CURRENT` pointer file names the live manifest and is replaced
//! atomically via temp-file + rename, so a crash between building a table
//! and recording it can only leave an orphan file, which the startup
//! sweep reclaims.

pub mod edit;
pub mod version;

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

pub use edit::{FileMetaData, FileMetaHandle, VersionEdit};
pub use version::{L0_COMPACTION_TRIGGER, Version, max_bytes_for_level};

use crate::comparator::InternalKeyComparator;
use crate::error::{Error, Result};
use crate::filenames;
use crate::manifest::version::user_key_of;
use crate::types::SequenceNumber;
use crate::wal::{LogReader, LogWriter};

/// Number of levels in the tree.
pub const NUM_LEVELS: usize = 7;

/// Compaction outputs are split when they reach this size.
pub const TARGET_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// A selected compaction: one or more files from `level`, plus every
/// overlapping file from `level + 1`.
pub struct Compaction {
    pub level: usize,
    /// inputs[0] = level files, inputs[1] = level+1 files.
    pub inputs: [Vec<FileMetaHandle>; 2],
}

impl Compaction {
    /// A single input file with nothing to merge against can simply be
    /// reparented to the next level by a manifest edit.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs[0].len() == 1 && self.inputs[1].is_empty()
    }

    pub fn total_input_bytes(&self) -> u64 {
        self.inputs
            .iter()
            .flat_map(|files| files.iter())
            .map(|f| f.file_size)
            .sum()
    }

    pub fn num_input_files(&self) -> usize {
        self.inputs[0].len() + self.inputs[1].len()
    }

    /// Record the removal of every input file in `edit`.
    pub fn add_input_deletions(&self, edit: &mut VersionEdit) {
        for file in &self.inputs[0] {
            edit.delete_file(self.level, file.number);
        }
        for file in &self.inputs[1] {
            edit.delete_file(self.level + 1, file.number);
        }
    }
}

/// Owns the version chain, the manifest log, and the global counters
/// (file numbers, last committed sequence number, live log number).
pub struct VersionSet {
    dir: PathBuf,
    icmp: InternalKeyComparator,
    /// Manifest rotation threshold; 0 = rewrite only on open.
    max_manifest_size: u64,

    current: Arc<Version>,
    /// Every version ever installed that may still be referenced by an
    /// in-flight read, iterator or snapshot. Pruned opportunistically.
    live: Vec<Weak<Version>>,

    next_file_number: u64,
    last_sequence: SequenceNumber,
    /// Logs with numbers below this are obsolete.
    log_number: u64,
    manifest_number: u64,
    manifest_log: Option<LogWriter>,

    /// Per-level key at which the next round-robin compaction resumes.
    compact_pointers: Vec<Vec<u8>>,
}

impl VersionSet {
    pub fn new(dir: &Path, icmp: InternalKeyComparator, max_manifest_size: u64) -> VersionSet {
        VersionSet {
            dir: dir.to_path_buf(),
            icmp: icmp.clone(),
            max_manifest_size,
            current: Arc::new(Version::empty(icmp)),
            live: Vec::new(),
            next_file_number: 1,
            last_sequence: 0,
            log_number: 0,
            manifest_number: 0,
            manifest_log: None,
            compact_pointers: vec![Vec::new(); NUM_LEVELS],
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence);
        self.last_sequence = sequence;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn manifest_number(&self) -> u64 {
        self.manifest_number
    }

    /// Allocate a fresh file number.
    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Ensure the counter stays ahead of an externally observed number.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn compact_pointer(&self, level: usize) -> &[u8] {
        &self.compact_pointers[level]
    }

    /// Initialize a brand-new store: an empty version, a fresh manifest
    /// and a CURRENT file pointing at it.
    pub fn create_new(&mut self, comparator_name: &str) -> Result<()> {
        let manifest_number = self.new_file_number();
        let mut edit = VersionEdit::new();
        edit.comparator_name = Some(comparator_name.to_owned());
        edit.log_number = Some(self.log_number);
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);

        let path = filenames::manifest_file(&self.dir, manifest_number);
        let mut writer = LogWriter::create(&path)?;
        writer.add_record(&edit.encode())?;
        writer.sync()?;

        self.install_current_pointer(manifest_number)?;
        self.manifest_number = manifest_number;
        self.manifest_log = Some(writer);
        Ok(())
    }

    /// Rebuild state from CURRENT + the manifest log it names.
    ///
    /// A truncated trailing record is tolerated (crash during a manifest
    /// append: that edit never committed); any decodable-but-invalid
    /// content is fatal corruption.
    pub fn recover(&mut self, comparator_name: &str) -> Result<()> {
        let current_path = filenames::current_file(&self.dir);
        let pointer = fs::read_to_string(&current_path)?;
        let manifest_name = pointer.trim_end();
        let Some((filenames::FileType::Manifest, manifest_number)) =
            filenames::parse_file_name(manifest_name)
        else {
            return Err(Error::Corruption(format!(
                "CURRENT names unrecognized file: {manifest_name}"
            )));
        };

        let manifest_path = self.dir.join(manifest_name);
        let mut reader = LogReader::open(&manifest_path, false)?;
        let mut builder = VersionBuilder::new(self.current());
        let mut log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut edits = 0usize;
        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode(&record)?;
            if let Some(name) = &edit.comparator_name {
                if name != comparator_name {
                    return Err(Error::InvalidArgument(format!(
                        "store was created with comparator '{name}', opened with '{comparator_name}'"
                    )));
                }
            }
            for (level, key) in &edit.compact_pointers {
                self.compact_pointers[*level] = key.clone();
            }
            builder.apply(&edit);
            log_number = edit.log_number.or(log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);
            edits += 1;
        }
        let (Some(next_file_number), Some(last_sequence)) = (next_file_number, last_sequence)
        else {
            return Err(Error::Corruption(
                "manifest is missing file-number or sequence metadata".into(),
            ));
        };

        self.log_number = log_number.unwrap_or(0);
        self.next_file_number = next_file_number;
        self.last_sequence = last_sequence;
        self.mark_file_number_used(manifest_number);
        self.mark_file_number_used(self.log_number);
        self.manifest_number = manifest_number;
        self.install_version(builder.build(&self.icmp));
        log::info!(
            "recovered manifest {manifest_name}: {edits} edits, last sequence {last_sequence}"
        );
        Ok(())
    }

    /// Apply `edit` to the current version, persist it, and install the
    /// result as the new current version. All-or-nothing: if the manifest
    /// append or sync fails the in-memory state is unchanged.
    pub fn log_and_apply(&mut self, mut edit: VersionEdit) -> Result<()> {
        if edit.log_number.is_none() {
            edit.log_number = Some(self.log_number);
        }

        let mut builder = VersionBuilder::new(self.current());
        builder.apply(&edit);
        let version = builder.build(&self.icmp);

        // Rotation may allocate file numbers; capture the counters after.
        self.rotate_manifest_if_needed()?;
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);
        let writer = self
            .manifest_log
            .as_mut()
            .expect("manifest log not open; call create_new or recover first");
        writer.add_record(&edit.encode())?;
        writer.sync()?;

        // Point of no return: the edit is durable.
        for (level, key) in &edit.compact_pointers {
            self.compact_pointers[*level] = key.clone();
        }
        if let Some(n) = edit.log_number {
            self.log_number = n;
        }
        self.install_version(version);
        Ok(())
    }

    fn install_version(&mut self, version: Version) {
        let version = Arc::new(version);
        self.live.retain(|weak| weak.strong_count() > 0);
        self.live.push(Arc::downgrade(&version));
        self.current = version;
    }

    /// Start a fresh manifest containing a snapshot of the current state.
    /// Called on open (always) and when the live manifest outgrows the
    /// configured limit.
    pub fn rewrite_manifest(&mut self) -> Result<()> {
        let manifest_number = self.new_file_number();
        let path = filenames::manifest_file(&self.dir, manifest_number);
        let mut writer = LogWriter::create(&path)?;
        let snapshot = self.snapshot_edit();
        writer.add_record(&snapshot.encode())?;
        writer.sync()?;
        self.install_current_pointer(manifest_number)?;

        let old = self.manifest_number;
        self.manifest_number = manifest_number;
        self.manifest_log = Some(writer);
        if old != 0 && old != manifest_number {
            let _ = fs::remove_file(filenames::manifest_file(&self.dir, old));
        }
        Ok(())
    }

    fn rotate_manifest_if_needed(&mut self) -> Result<()> {
        if self.max_manifest_size == 0 {
            return Ok(());
        }
        let oversized = self
            .manifest_log
            .as_ref()
            .is_some_and(|w| w.offset() > self.max_manifest_size);
        if oversized {
            log::info!(
                "manifest exceeded {} bytes, rotating to a fresh snapshot",
                self.max_manifest_size
            );
            self.rewrite_manifest()?;
        }
        Ok(())
    }

    /// One edit describing the complete current state.
    fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::new();
        edit.comparator_name = Some(self.icmp.user_comparator().name().to_owned());
        edit.log_number = Some(self.log_number);
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);
        for (level, pointer) in self.compact_pointers.iter().enumerate() {
            if !pointer.is_empty() {
                edit.set_compact_pointer(level, pointer.clone());
            }
        }
        for level in 0..NUM_LEVELS {
            for file in self.current.files(level) {
                edit.add_file(level, (**file).clone());
            }
        }
        edit
    }

    /// Atomically replace CURRENT via a temp file + rename.
    fn install_current_pointer(&mut self, manifest_number: u64) -> Result<()> {
        let tmp_number = self.new_file_number();
        let tmp_path = filenames::temp_file(&self.dir, tmp_number);
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            writeln!(tmp, "MANIFEST-{manifest_number:06}")?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, filenames::current_file(&self.dir))?;
        Ok(())
    }

    /// File numbers referenced by any version a reader could still hold.
    pub fn live_files(&mut self) -> HashSet<u64> {
        self.live.retain(|weak| weak.strong_count() > 0);
        let mut live = HashSet::new();
        for weak in &self.live {
            if let Some(version) = weak.upgrade() {
                for level in 0..NUM_LEVELS {
                    for file in version.files(level) {
                        live.insert(file.number);
                    }
                }
            }
        }
        for level in 0..NUM_LEVELS {
            for file in self.current.files(level) {
                live.insert(file.number);
            }
        }
        live
    }

    /// Pick the most urgent size-triggered compaction, or None when the
    /// tree is in shape.
    pub fn pick_compaction(&self) -> Option<Compaction> {
        if self.current.compaction_score < 1.0 {
            return None;
        }
        let level = self.current.compaction_level;
        let files = self.current.files(level);
        if files.is_empty() {
            return None;
        }

        // Round-robin: resume after the last key compacted at this level.
        let pointer = &self.compact_pointers[level];
        let seed = files
            .iter()
            .find(|f| pointer.is_empty() || self.icmp.compare(&f.largest, pointer).is_gt())
            .or_else(|| files.first())?;
        let mut inputs0 = vec![Arc::clone(seed)];

        if level == 0 {
            // Level-0 files overlap; pull in everything the seed touches.
            inputs0 = self.current.overlapping_inputs(
                0,
                Some(user_key_of(&seed.smallest)),
                Some(user_key_of(&seed.largest)),
            );
            debug_assert!(!inputs0.is_empty());
        }

        Some(self.setup_other_inputs(level, inputs0))
    }

    /// A compaction covering every file at `level` overlapping the user
    /// key range, for manual range compaction. None when nothing overlaps.
    pub fn compact_range(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Option<Compaction> {
        let inputs0 = self.current.overlapping_inputs(level, begin, end);
        if inputs0.is_empty() {
            return None;
        }
        Some(self.setup_other_inputs(level, inputs0))
    }

    fn setup_other_inputs(&self, level: usize, mut inputs0: Vec<FileMetaHandle>) -> Compaction {
        add_boundary_inputs(&self.icmp, self.current.files(level), &mut inputs0);
        let (smallest, largest) = self.key_range(&inputs0);
        let inputs1 = if level + 1 < NUM_LEVELS {
            self.current.overlapping_inputs(
                level + 1,
                Some(user_key_of(&smallest)),
                Some(user_key_of(&largest)),
            )
        } else {
            Vec::new()
        };
        Compaction {
            level,
            inputs: [inputs0, inputs1],
        }
    }

    fn key_range(&self, files: &[FileMetaHandle]) -> (Vec<u8>, Vec<u8>) {
        debug_assert!(!files.is_empty());
        let mut smallest = files[0].smallest.clone();
        let mut largest = files[0].largest.clone();
        for file in &files[1..] {
            if self.icmp.compare(&file.smallest, &smallest).is_lt() {
                smallest = file.smallest.clone();
            }
            if self.icmp.compare(&file.largest, &largest).is_gt() {
                largest = file.largest.clone();
            }
        }
        (smallest, largest)
    }
}

/// Completing a compaction at level L must also pull in any level-L file
/// whose smallest user key equals the chosen range's largest user key.
/// Otherwise an older version of that boundary key could be left at L
/// while a newer version moves to L+1, and reads (which search L first)
/// would resurface the stale version.
fn add_boundary_inputs(
    icmp: &InternalKeyComparator,
    level_files: &[FileMetaHandle],
    inputs: &mut Vec<FileMetaHandle>,
) {
    if inputs.is_empty() {
        return;
    }
    loop {
        let largest = inputs
            .iter()
            .map(|f| &f.largest)
            .max_by(|a, b| icmp.compare(a, b))
            .cloned()
            .expect("inputs not empty");
        let boundary = level_files
            .iter()
            .filter(|f| {
                icmp.compare(&f.smallest, &largest).is_gt()
                    && icmp
                        .user_comparator()
                        .compare(user_key_of(&f.smallest), user_key_of(&largest))
                        .is_eq()
            })
            .min_by(|a, b| icmp.compare(&a.smallest, &b.smallest))
            .cloned();
        match boundary {
            Some(file) if !inputs.iter().any(|f| f.number == file.number) => {
                inputs.push(file);
            }
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::types::{InternalKey, ValueType};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn ik(key: &str, seq: u64) -> Vec<u8> {
        InternalKey::new(key.as_bytes(), seq, ValueType::Value).encode()
    }

    fn file(number: u64, smallest: &str, largest: &str, size: u64) -> FileMetaData {
        FileMetaData {
            number,
            file_size: size,
            smallest: ik(smallest, number * 10),
            largest: ik(largest, number * 10 + 1),
        }
    }

    fn version_with(edit: &VersionEdit) -> Version {
        let mut builder = VersionBuilder::new(Arc::new(Version::empty(icmp())));
        builder.apply(edit);
        builder.build(&icmp())
    }

    #[test]
    fn builder_applies_adds_and_deletes() {
        let mut edit = VersionEdit::new();
        edit.add_file(0, file(3, "a", "m", 100));
        edit.add_file(0, file(5, "c", "z", 100));
        edit.add_file(1, file(4, "a", "f", 100));
        let base = version_with(&edit);
        assert_eq!(base.num_files(0), 2);
        // Level 0 is ordered newest flush first.
        assert_eq!(base.files(0)[0].number, 5);
        assert_eq!(base.files(0)[1].number, 3);

        let mut second = VersionEdit::new();
        second.delete_file(0, 3);
        second.add_file(1, file(6, "g", "k", 100));
        let mut builder = VersionBuilder::new(Arc::new(base));
        builder.apply(&second);
        let next = builder.build(&icmp());
        assert_eq!(next.num_files(0), 1);
        assert_eq!(next.num_files(1), 2);
        // Deeper levels sort by smallest key.
        assert_eq!(next.files(1)[0].number, 4);
        assert_eq!(next.files(1)[1].number, 6);
    }

    #[test]
    fn level0_file_count_drives_score() {
        let mut edit = VersionEdit::new();
        for number in 1..=4 {
            edit.add_file(0, file(number, "a", "z", 1000));
        }
        let version = version_with(&edit);
        assert_eq!(version.compaction_level, 0);
        assert!(version.compaction_score >= 1.0);

        let mut small = VersionEdit::new();
        small.add_file(0, file(1, "a", "z", 1000));
        let version = version_with(&small);
        assert!(version.compaction_score < 1.0);
    }

    #[test]
    fn deep_levels_score_by_bytes() {
        let mut edit = VersionEdit::new();
        // 20 MiB at level 1 is twice its budget.
        edit.add_file(1, file(1, "a", "m", 10 << 20));
        edit.add_file(1, file(2, "n", "z", 10 << 20));
        let version = version_with(&edit);
        assert_eq!(version.compaction_level, 1);
        assert!(version.compaction_score >= 2.0);
    }

    #[test]
    fn overlapping_inputs_at_level0_widen_transitively() {
        let mut edit = VersionEdit::new();
        edit.add_file(0, file(1, "a", "e", 100));
        edit.add_file(0, file(2, "d", "j", 100));
        edit.add_file(0, file(3, "i", "p", 100));
        edit.add_file(0, file(4, "x", "z", 100));
        let version = version_with(&edit);

        // Seeding with [a, e] must drag in the whole overlap chain.
        let inputs = version.overlapping_inputs(0, Some(b"a"), Some(b"e"));
        let mut numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn boundary_files_join_their_compaction() {
        // File 2 starts at the same user key file 1 ends on (an older
        // version); compacting file 1 alone would strand it.
        let older_version = FileMetaData {
            number: 2,
            file_size: 100,
            smallest: ik("m", 5),
            largest: ik("r", 6),
        };
        let seed = FileMetaData {
            number: 1,
            file_size: 100,
            smallest: ik("a", 20),
            largest: ik("m", 21),
        };
        let level_files = vec![Arc::new(seed.clone()), Arc::new(older_version)];
        let mut inputs = vec![Arc::clone(&level_files[0])];
        add_boundary_inputs(&icmp(), &level_files, &mut inputs);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].number, 2);
    }

    #[test]
    fn is_base_level_checks_deeper_levels_only() {
        let mut edit = VersionEdit::new();
        edit.add_file(2, file(1, "f", "k", 100));
        let version = version_with(&edit);
        assert!(!version.is_base_level_for_key(1, b"g"));
        assert!(version.is_base_level_for_key(2, b"g"));
        assert!(version.is_base_level_for_key(1, b"zzz"));
    }
}

/// Applies edits to a base version to produce the next one.
struct VersionBuilder {
    levels: Vec<Vec<FileMetaHandle>>,
    deleted: Vec<HashSet<u64>>,
}

impl VersionBuilder {
    fn new(base: Arc<Version>) -> VersionBuilder {
        VersionBuilder {
            levels: (0..NUM_LEVELS).map(|l| base.files(l).to_vec()).collect(),
            deleted: vec![HashSet::new(); NUM_LEVELS],
        }
    }

    fn apply(&mut self, edit: &VersionEdit) {
        for (level, number) in &edit.deleted_files {
            self.deleted[*level].insert(*number);
        }
        for (level, file) in &edit.new_files {
            // An edit may re-add a file it also deletes (never happens in
            // practice); adds win.
            self.deleted[*level].remove(&file.number);
            self.levels[*level].push(Arc::new(file.clone()));
        }
    }

    fn build(mut self, icmp: &InternalKeyComparator) -> Version {
        let mut version = Version::empty(icmp.clone());
        for (level, mut files) in self.levels.drain(..).enumerate() {
            let deleted = &self.deleted[level];
            files.retain(|f| !deleted.contains(&f.number));
            if level == 0 {
                // Newest flush first.
                files.sort_by(|a, b| b.number.cmp(&a.number));
            } else {
                files.sort_by(|a, b| icmp.compare(&a.smallest, &b.smallest));
                debug_assert!(
                    files
                        .windows(2)
                        .all(|w| icmp.compare(&w[0].largest, &w[1].smallest).is_lt()),
                    "overlapping files within level {level}"
                );
            }
            version.files[level] = files;
        }
        version.finalize();
        version
    }
}

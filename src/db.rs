//! The database façade: opening, reading, writing, snapshots, iteration
//! and compaction control.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::batch::WriteBatch;
use crate::cache::{BlockCache, TableCache};
use crate::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
use crate::compaction::{BgMessage, CompactionStats, CompactionWorker};
use crate::compress::CompressionType;
use crate::error::{Error, Result};
use crate::filenames::{self, FileType};
use crate::iterator::{DbIterator, MergeIterator, StorageIterator};
use crate::manifest::{NUM_LEVELS, VersionEdit, VersionSet};
use crate::memtable::{LookupResult, MemTable};
use crate::sstable::{TableBuilder, TableOptions};
use crate::types::{InternalKey, SequenceNumber, VALUE_TYPE_FOR_SEEK};
use crate::wal::{LogReader, LogWriter};

/// Configuration for opening a database.
#[derive(Clone)]
pub struct Options {
    /// Create the store if it doesn't exist yet.
    pub create_if_missing: bool,
    /// Fail open() if the store already exists.
    pub error_if_exists: bool,
    /// Treat any detected inconsistency as fatal, including a truncated
    /// tail in a log (normally the expected outcome of a crash).
    pub paranoid_checks: bool,
    /// Memtable size that triggers a flush to a level-0 table.
    pub write_buffer_size: usize,
    /// Budget of open table handles (file descriptors).
    pub max_open_files: usize,
    /// Target uncompressed size of one table block.
    pub block_size: usize,
    /// Entries between prefix-compression restart points.
    pub block_restart_interval: usize,
    /// Codec for new table blocks.
    pub compression: CompressionType,
    /// Verify block checksums on every read.
    pub verify_checksums: bool,
    /// Byte budget for the decoded-block cache.
    pub cache_size: u64,
    /// Key ordering; None = byte-wise. The comparator's name is persisted
    /// and must match on reopen.
    pub comparator: Option<Arc<dyn Comparator>>,
    /// Maximum operations in a single write batch.
    pub max_batch_size: usize,
    /// Manifest size that triggers rotation; 0 = rewrite only on open.
    pub max_manifest_size: u64,
    /// Bloom filter budget per key; 0 disables the filter.
    pub bits_per_key: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 << 20,
            max_open_files: 1000,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::Lz4,
            verify_checksums: true,
            cache_size: 8 << 20,
            comparator: None,
            max_batch_size: 80_000,
            max_manifest_size: 0,
            bits_per_key: 0,
        }
    }
}

impl Options {
    pub(crate) fn table_options(&self) -> TableOptions {
        TableOptions {
            block_size: self.block_size,
            block_restart_interval: self.block_restart_interval,
            compression: self.compression,
            bits_per_key: self.bits_per_key,
            verify_checksums: self.verify_checksums,
        }
    }

    fn user_comparator(&self) -> Arc<dyn Comparator> {
        self.comparator
            .clone()
            .unwrap_or_else(|| Arc::new(BytewiseComparator))
    }
}

/// Per-read options.
#[derive(Default, Clone)]
pub struct ReadOptions {
    /// Read as of this snapshot instead of the latest committed state.
    pub snapshot: Option<Snapshot>,
}

/// Per-write options.
#[derive(Default, Clone, Copy)]
pub struct WriteOptions {
    /// fsync the log before acknowledging the write.
    pub sync: bool,
    /// Also return a snapshot taken just after this write.
    pub snapshot: bool,
}

type SnapshotRegistry = Arc<Mutex<BTreeMap<SequenceNumber, usize>>>;

/// An immutable read view pinned to a sequence number.
///
/// Reads and iterators bounded by a snapshot observe exactly the writes
/// committed at or below its sequence number, for as long as the handle
/// (or any clone) lives. Dropping the last handle releases the pin;
/// `release()` is the explicit spelling of the same thing.
pub struct Snapshot {
    sequence: SequenceNumber,
    registry: SnapshotRegistry,
}

impl Snapshot {
    fn new(sequence: SequenceNumber, registry: SnapshotRegistry) -> Snapshot {
        *registry.lock().entry(sequence).or_insert(0) += 1;
        Snapshot { sequence, registry }
    }

    /// The sequence number this snapshot observes.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Explicitly release the snapshot (equivalent to dropping it).
    pub fn release(self) {}
}

impl Clone for Snapshot {
    fn clone(&self) -> Snapshot {
        Snapshot::new(self.sequence, Arc::clone(&self.registry))
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if let Some(count) = registry.get_mut(&self.sequence) {
            *count -= 1;
            if *count == 0 {
                registry.remove(&self.sequence);
            }
        }
    }
}

/// State guarded by the single engine mutex.
pub(crate) struct DbState {
    pub(crate) mem: Arc<MemTable>,
    /// Frozen memtable awaiting flush; still serves reads.
    pub(crate) imm: Option<Arc<MemTable>>,
    pub(crate) log: LogWriter,
    pub(crate) log_number: u64,
    pub(crate) versions: VersionSet,
    /// A failed background flush/compaction parks its error here; writes
    /// surface it until the store is reopened.
    pub(crate) bg_error: Option<Error>,
}

pub(crate) struct DbInner {
    pub(crate) path: PathBuf,
    pub(crate) opts: Options,
    pub(crate) icmp: InternalKeyComparator,
    pub(crate) table_cache: TableCache,
    pub(crate) state: Mutex<DbState>,
    /// Signaled when a flush completes (or fails), unblocking stalled
    /// writers.
    pub(crate) flush_done: Condvar,
    pub(crate) snapshots: SnapshotRegistry,
    pub(crate) stats: Mutex<[CompactionStats; NUM_LEVELS]>,
    pub(crate) bg_tx: Sender<BgMessage>,
}

/// A persistent, ordered key-value store.
///
/// Safe for concurrent use from multiple threads without external
/// synchronization. One background worker performs flushes and
/// compactions; all other operations run on the caller's thread.
pub struct DB {
    inner: Arc<DbInner>,
    worker: CompactionWorker,
}

impl DB {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<DB> {
        let path = path.as_ref();
        let ucmp = opts.user_comparator();
        let icmp = InternalKeyComparator::new(Arc::clone(&ucmp));

        let current_exists = filenames::current_file(path).exists();
        if current_exists && opts.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "store already exists: {}",
                path.display()
            )));
        }
        if !current_exists && !opts.create_if_missing {
            return Err(Error::InvalidArgument(format!(
                "store does not exist: {}",
                path.display()
            )));
        }
        fs::create_dir_all(path)?;

        let mut versions = VersionSet::new(path, icmp.clone(), opts.max_manifest_size);
        let block_cache = Arc::new(BlockCache::new(opts.cache_size, opts.block_size));
        let table_cache = TableCache::new(
            path,
            icmp.clone(),
            opts.table_options(),
            block_cache,
            opts.max_open_files,
        );

        let mut edit = VersionEdit::new();
        if current_exists {
            versions.recover(ucmp.name())?;
            // Open a fresh manifest: recovery state becomes one snapshot
            // record and stale manifests become sweepable.
            versions.rewrite_manifest()?;
            replay_logs(path, &opts, &icmp, &mut versions, &mut edit)?;
        } else {
            versions.create_new(ucmp.name())?;
            log::info!("created new store at {}", path.display());
        }

        // Every open starts a fresh write-buffer generation.
        let log_number = versions.new_file_number();
        let log = LogWriter::create(&filenames::log_file(path, log_number))?;
        edit.log_number = Some(log_number);
        versions.log_and_apply(edit)?;

        let (bg_tx, bg_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(DbInner {
            path: path.to_path_buf(),
            icmp: icmp.clone(),
            table_cache,
            state: Mutex::new(DbState {
                mem: Arc::new(MemTable::new(icmp)),
                imm: None,
                log,
                log_number,
                versions,
                bg_error: None,
            }),
            flush_done: Condvar::new(),
            snapshots: Arc::new(Mutex::new(BTreeMap::new())),
            stats: Mutex::new(std::array::from_fn(|_| CompactionStats::default())),
            bg_tx,
            opts,
        });
        inner.delete_obsolete_files(&mut inner.state.lock());

        let worker = CompactionWorker::spawn(Arc::clone(&inner), bg_rx);
        let _ = inner.bg_tx.send(BgMessage::Work);
        Ok(DB { inner, worker })
    }

    /// Remove a store and everything it owns. The directory itself is
    /// removed if nothing else lives in it.
    pub fn destroy(path: impl AsRef<Path>, _opts: Options) -> Result<()> {
        let path = path.as_ref();
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if filenames::parse_file_name(name).is_some() {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        let _ = fs::remove_dir(path);
        Ok(())
    }

    /// Best-effort salvage after corruption: every readable table and
    /// every replayable log record is kept; everything else is lost.
    /// The result is a fresh manifest with all salvaged tables at level 0.
    pub fn repair(path: impl AsRef<Path>, opts: Options) -> Result<()> {
        crate::compaction::repair_store(path.as_ref(), &opts)
    }

    /// Read a key at the latest committed state.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_opt(&ReadOptions::default(), key)
    }

    /// Read a key, optionally at a snapshot.
    pub fn get_opt(&self, read_opts: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (sequence, mem, imm, version) = {
            let state = self.inner.state.lock();
            let sequence = read_opts
                .snapshot
                .as_ref()
                .map(|s| s.sequence())
                .unwrap_or_else(|| state.versions.last_sequence());
            (
                sequence,
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.versions.current(),
            )
        };

        if let Some(result) = mem.get(key, sequence) {
            return Ok(lookup_to_option(result));
        }
        if let Some(imm) = imm {
            if let Some(result) = imm.get(key, sequence) {
                return Ok(lookup_to_option(result));
            }
        }
        match version.get(&self.inner.table_cache, key, sequence)? {
            Some(result) => Ok(lookup_to_option(result)),
            None => Ok(None),
        }
    }

    /// Insert or update a key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_opt(&WriteOptions::default(), key, value).map(drop)
    }

    /// Insert or update a key with explicit durability/snapshot options.
    pub fn put_opt(
        &self,
        write_opts: &WriteOptions,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<Snapshot>> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write_opt(write_opts, batch)
    }

    /// Delete a key (write a tombstone).
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_opt(&WriteOptions::default(), key).map(drop)
    }

    pub fn delete_opt(&self, write_opts: &WriteOptions, key: &[u8]) -> Result<Option<Snapshot>> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write_opt(write_opts, batch)
    }

    /// Apply a batch atomically.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.write_opt(&WriteOptions::default(), batch).map(drop)
    }

    /// Apply a batch atomically: all entries become visible under one
    /// commit, or (on failure before the durable append) none do.
    pub fn write_opt(
        &self,
        write_opts: &WriteOptions,
        mut batch: WriteBatch,
    ) -> Result<Option<Snapshot>> {
        if batch.count() as usize > self.inner.opts.max_batch_size {
            return Err(Error::InvalidArgument(format!(
                "batch of {} operations exceeds max_batch_size {}",
                batch.count(),
                self.inner.opts.max_batch_size
            )));
        }

        let mut state = self.inner.state.lock();
        if let Some(e) = &state.bg_error {
            return Err(e.duplicate());
        }
        self.inner.make_room_for_write(&mut state)?;

        let base = state.versions.last_sequence();
        let last = base + batch.count() as u64;
        batch.set_sequence(base + 1);

        // Durable first. If the append or sync fails nothing was applied
        // and the sequence counter is untouched.
        state.log.add_record(batch.contents())?;
        if write_opts.sync {
            state.log.sync()?;
        }

        let mem = Arc::clone(&state.mem);
        batch.for_each(|value_type, sequence, key, value| {
            mem.add(sequence, value_type, key, value);
            Ok(())
        })?;
        state.versions.set_last_sequence(last);
        drop(state);

        Ok(write_opts
            .snapshot
            .then(|| Snapshot::new(last, Arc::clone(&self.inner.snapshots))))
    }

    /// Acquire a snapshot of the current committed state.
    pub fn snapshot(&self) -> Snapshot {
        let sequence = self.inner.state.lock().versions.last_sequence();
        Snapshot::new(sequence, Arc::clone(&self.inner.snapshots))
    }

    /// Iterate the whole store at the latest committed state.
    pub fn iter(&self) -> Result<DbIterator> {
        self.iter_opt(&ReadOptions::default())
    }

    /// Iterate, optionally bounded by a snapshot. The iterator is
    /// initially unpositioned; seek before use.
    pub fn iter_opt(&self, read_opts: &ReadOptions) -> Result<DbIterator> {
        let state = self.inner.state.lock();
        let sequence = read_opts
            .snapshot
            .as_ref()
            .map(|s| s.sequence())
            .unwrap_or_else(|| state.versions.last_sequence());
        let mem = Arc::clone(&state.mem);
        let imm = state.imm.clone();
        let version = state.versions.current();
        drop(state);

        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        children.push(Box::new(mem.iter()));
        if let Some(imm) = imm {
            children.push(Box::new(imm.iter()));
        }
        for level in 0..NUM_LEVELS {
            for file in version.files(level) {
                let table = self.inner.table_cache.get_table(file.number)?;
                children.push(Box::new(table.iter()));
            }
        }
        let merged = MergeIterator::new(self.inner.icmp.clone(), children);
        Ok(DbIterator::new(
            Arc::clone(self.inner.icmp.user_comparator()),
            merged,
            sequence,
            version,
        ))
    }

    /// Approximate file-system bytes used by each `[start, limit)` range.
    /// Recently written (unflushed) data is not included.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Result<Vec<u64>> {
        let version = self.inner.state.lock().versions.current();
        let mut sizes = Vec::with_capacity(ranges.len());
        for (start, limit) in ranges {
            let start_offset = self.inner.approximate_offset_of(&version, start)?;
            let limit_offset = self.inner.approximate_offset_of(&version, limit)?;
            sizes.push(limit_offset.saturating_sub(start_offset));
        }
        Ok(sizes)
    }

    /// Introspection. Understood names:
    /// `stratadb.num-files-at-level<N>`, `stratadb.stats`,
    /// `stratadb.sstables`, `stratadb.approximate-memory-usage`.
    pub fn property(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix("stratadb.")?;
        let state = self.inner.state.lock();
        if let Some(level) = rest.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            if level >= NUM_LEVELS {
                return None;
            }
            return Some(state.versions.current().num_files(level).to_string());
        }
        match rest {
            "stats" => {
                let version = state.versions.current();
                let stats = self.inner.stats.lock();
                let mut out = String::from(
                    "Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n\
                     --------------------------------------------------\n",
                );
                for level in 0..NUM_LEVELS {
                    let files = version.num_files(level);
                    let s = &stats[level];
                    if files == 0 && s.is_empty() {
                        continue;
                    }
                    let _ = writeln!(
                        out,
                        "{:>5} {:>6} {:>8.2} {:>9.3} {:>8.2} {:>9.2}",
                        level,
                        files,
                        version.level_bytes(level) as f64 / 1048576.0,
                        s.micros as f64 / 1e6,
                        s.bytes_read as f64 / 1048576.0,
                        s.bytes_written as f64 / 1048576.0,
                    );
                }
                Some(out)
            }
            "sstables" => {
                let version = state.versions.current();
                let mut out = String::new();
                for level in 0..NUM_LEVELS {
                    let _ = writeln!(out, "--- level {level} ---");
                    for file in version.files(level) {
                        let smallest = InternalKey::decode(&file.smallest);
                        let largest = InternalKey::decode(&file.largest);
                        let _ = writeln!(
                            out,
                            "{:06}: {} bytes [{:?} .. {:?}]",
                            file.number,
                            file.file_size,
                            smallest.map(|k| String::from_utf8_lossy(&k.user_key).into_owned()),
                            largest.map(|k| String::from_utf8_lossy(&k.user_key).into_owned()),
                        );
                    }
                }
                Some(out)
            }
            "approximate-memory-usage" => {
                let mut total = state.mem.approximate_size();
                if let Some(imm) = &state.imm {
                    total += imm.approximate_size();
                }
                Some(total.to_string())
            }
            _ => None,
        }
    }

    /// Force the active memtable out to a level-0 table.
    pub fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        self.inner
            .bg_tx
            .send(BgMessage::Flush { done: done_tx })
            .map_err(|_| Error::InvalidArgument("background worker is gone".into()))?;
        done_rx
            .recv()
            .map_err(|_| Error::InvalidArgument("background worker is gone".into()))?
    }

    /// Compact every level overlapping the given user-key range
    /// (`None` = unbounded). Deleted and overwritten versions no snapshot
    /// can observe are discarded.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        self.inner
            .bg_tx
            .send(BgMessage::ManualCompaction {
                begin: begin.map(|b| b.to_vec()),
                end: end.map(|e| e.to_vec()),
                done: done_tx,
            })
            .map_err(|_| Error::InvalidArgument("background worker is gone".into()))?;
        done_rx
            .recv()
            .map_err(|_| Error::InvalidArgument("background worker is gone".into()))?
    }

    /// Pause background compactions. Returns once the worker has parked;
    /// an in-progress compaction finishes first (cooperative, never a
    /// mid-file interruption).
    pub fn suspend_compactions(&self) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.inner.bg_tx.send(BgMessage::Suspend(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Resume background compactions.
    pub fn resume_compactions(&self) {
        let _ = self.inner.bg_tx.send(BgMessage::Resume);
        let _ = self.inner.bg_tx.send(BgMessage::Work);
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        let _ = self.inner.bg_tx.send(BgMessage::Shutdown);
        self.worker.join();
        // Make everything appended so far durable.
        let mut state = self.inner.state.lock();
        if let Err(e) = state.log.sync() {
            log::warn!("final log sync failed: {e}");
        }
    }
}

impl DbInner {
    /// Smallest sequence any live snapshot can still observe; entries
    /// below it shadowed by newer ones are garbage.
    pub(crate) fn smallest_live_snapshot(&self, last_sequence: SequenceNumber) -> SequenceNumber {
        self.snapshots
            .lock()
            .keys()
            .next()
            .copied()
            .unwrap_or(last_sequence)
    }

    /// Ensure the active memtable has room; rotates memtables and stalls
    /// the writer while a previous flush is still in flight.
    fn make_room_for_write(&self, state: &mut parking_lot::MutexGuard<'_, DbState>) -> Result<()> {
        loop {
            if let Some(e) = &state.bg_error {
                return Err(e.duplicate());
            }
            if state.mem.approximate_size() < self.opts.write_buffer_size {
                return Ok(());
            }
            if state.imm.is_some() {
                // Write stall: the previous generation is still flushing.
                let _ = self.bg_tx.send(BgMessage::Work);
                self.flush_done.wait(state);
                continue;
            }
            // Freeze the active memtable and start a new generation.
            let new_log_number = state.versions.new_file_number();
            let log = LogWriter::create(&filenames::log_file(&self.path, new_log_number))?;
            state.log = log;
            state.log_number = new_log_number;
            state.imm = Some(std::mem::replace(
                &mut state.mem,
                Arc::new(MemTable::new(self.icmp.clone())),
            ));
            log::debug!("memtable frozen, new log {new_log_number:06}");
            let _ = self.bg_tx.send(BgMessage::Work);
        }
    }

    /// Sum of data preceding `user_key` across every table in `version`.
    fn approximate_offset_of(
        &self,
        version: &crate::manifest::Version,
        user_key: &[u8],
    ) -> Result<u64> {
        let target = InternalKey::new(user_key, crate::types::MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK)
            .encode();
        let mut total = 0u64;
        for level in 0..NUM_LEVELS {
            for file in version.files(level) {
                if self.icmp.compare(&file.largest, &target).is_lt() {
                    total += file.file_size;
                } else if self.icmp.compare(&file.smallest, &target).is_ge() {
                    // Entirely past the key.
                } else {
                    let table = self.table_cache.get_table(file.number)?;
                    total += table.approximate_offset_of(&target);
                }
            }
        }
        Ok(total)
    }

    /// Delete every file the engine owns that no live version, log or
    /// manifest still needs. Called on open and after each manifest
    /// commit, which is what reclaims orphans left by a crash between
    /// building a table and recording it.
    pub(crate) fn delete_obsolete_files(
        &self,
        state: &mut parking_lot::MutexGuard<'_, DbState>,
    ) {
        let live = state.versions.live_files();
        let log_number = state.versions.log_number();
        let manifest_number = state.versions.manifest_number();

        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("obsolete-file sweep failed to list {}: {e}", self.path.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((file_type, number)) = filenames::parse_file_name(name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => number >= log_number,
                FileType::Table => live.contains(&number),
                FileType::Manifest => number == manifest_number,
                FileType::Current => true,
                FileType::Temp => false,
            };
            if keep {
                continue;
            }
            if file_type == FileType::Table {
                self.table_cache.evict(number);
            }
            log::debug!("removing obsolete file {name}");
            if let Err(e) = fs::remove_file(entry.path()) {
                log::warn!("failed to remove obsolete file {name}: {e}");
            }
        }
    }

    /// Flush one memtable to a new level-0 table file and return its
    /// metadata. The caller commits the manifest edit.
    pub(crate) fn build_table(
        &self,
        mem: &Arc<MemTable>,
        file_number: u64,
    ) -> Result<crate::manifest::FileMetaData> {
        let path = filenames::table_file(&self.path, file_number);
        let mut builder = TableBuilder::new(&path, self.icmp.clone(), self.opts.table_options())?;
        let mut iter = mem.iter();
        iter.seek_to_first()?;
        while iter.is_valid() {
            builder.add(iter.key(), iter.value())?;
            iter.next()?;
        }
        let summary = builder.finish()?;
        Ok(crate::manifest::FileMetaData {
            number: file_number,
            file_size: summary.file_size,
            smallest: summary.smallest,
            largest: summary.largest,
        })
    }
}

fn lookup_to_option(result: LookupResult) -> Option<Vec<u8>> {
    match result {
        LookupResult::Found(value) => Some(value),
        LookupResult::Deleted => None,
    }
}

/// Replay every log at or above the manifest's log number into tables,
/// recording the results (and the recovered sequence number) in `edit`.
fn replay_logs(
    path: &Path,
    opts: &Options,
    icmp: &InternalKeyComparator,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
) -> Result<()> {
    let mut log_numbers: Vec<u64> = fs::read_dir(path)?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            match filenames::parse_file_name(name.to_str()?) {
                Some((FileType::Log, number)) if number >= versions.log_number() => Some(number),
                _ => None,
            }
        })
        .collect();
    log_numbers.sort_unstable();

    let mut max_sequence = versions.last_sequence();
    for number in &log_numbers {
        versions.mark_file_number_used(*number);
    }
    for number in log_numbers {
        let mut reader = LogReader::open(&filenames::log_file(path, number), opts.paranoid_checks)?;
        let mem = Arc::new(MemTable::new(icmp.clone()));
        let mut records = 0usize;
        while let Some(record) = reader.read_record()? {
            let batch = WriteBatch::from_contents(record)?;
            let mem_ref = Arc::clone(&mem);
            batch.for_each(|value_type, sequence, key, value| {
                mem_ref.add(sequence, value_type, key, value);
                Ok(())
            })?;
            let last = batch.sequence() + batch.count() as u64 - 1;
            max_sequence = max_sequence.max(last);
            records += 1;
        }
        log::info!("replayed log {number:06}: {records} batches");
        if mem.is_empty() {
            continue;
        }
        // Persist the recovered generation straight to a level-0 table.
        let file_number = versions.new_file_number();
        let table_path = filenames::table_file(path, file_number);
        let mut builder = TableBuilder::new(&table_path, icmp.clone(), opts.table_options())?;
        let mut iter = mem.iter();
        iter.seek_to_first()?;
        while iter.is_valid() {
            builder.add(iter.key(), iter.value())?;
            iter.next()?;
        }
        let summary = builder.finish()?;
        edit.add_file(
            0,
            crate::manifest::FileMetaData {
                number: file_number,
                file_size: summary.file_size,
                smallest: summary.smallest,
                largest: summary.largest,
            },
        );
    }
    versions.set_last_sequence(max_sequence);
    Ok(())
}

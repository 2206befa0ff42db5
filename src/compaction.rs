//! Background flush and compaction.
//!
//! One dedicated worker thread owns all background I/O. Foreground
//! threads talk to it over a control channel: new-work nudges, explicit
//! flush and range-compaction requests, and suspend/resume. Suspension is
//! cooperative — the worker finishes the unit it is on (never abandoning
//! a half-written table) before parking, and the suspend call returns
//! only once it has.

use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::batch::WriteBatch;
use crate::comparator::InternalKeyComparator;
use crate::db::{DbInner, Options};
use crate::error::{Error, Result};
use crate::filenames::{self, FileType};
use crate::iterator::{MergeIterator, StorageIterator};
use crate::manifest::{
    Compaction, FileMetaData, NUM_LEVELS, TARGET_FILE_SIZE, VersionEdit, VersionSet,
};
use crate::memtable::MemTable;
use crate::sstable::{Table, TableBuilder};
use crate::types::{SequenceNumber, ValueType, split_internal_key};
use crate::wal::LogReader;

/// Work and control messages for the background worker.
pub(crate) enum BgMessage {
    /// Something may need flushing or compacting.
    Work,
    /// Force the active memtable out, then report back.
    Flush { done: Sender<Result<()>> },
    /// Compact everything overlapping a user-key range, then report back.
    ManualCompaction {
        begin: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        done: Sender<Result<()>>,
    },
    /// Park after the current unit of work; ack once parked.
    Suspend(Sender<()>),
    Resume,
    Shutdown,
}

/// Per-level compaction accounting, surfaced by the stats property.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactionStats {
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl CompactionStats {
    pub(crate) fn add(&mut self, micros: u64, bytes_read: u64, bytes_written: u64) {
        self.micros += micros;
        self.bytes_read += bytes_read;
        self.bytes_written += bytes_written;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.micros == 0 && self.bytes_read == 0 && self.bytes_written == 0
    }
}

/// Handle to the background thread.
pub(crate) struct CompactionWorker {
    handle: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    pub(crate) fn spawn(inner: Arc<DbInner>, rx: Receiver<BgMessage>) -> CompactionWorker {
        let handle = thread::Builder::new()
            .name("stratadb-bg".into())
            .spawn(move || worker_loop(inner, rx))
            .expect("failed to spawn background worker");
        CompactionWorker {
            handle: Some(handle),
        }
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: Arc<DbInner>, rx: Receiver<BgMessage>) {
    let mut suspended = false;
    let mut pending_work = false;
    loop {
        // Control messages take priority; block only when idle.
        let message = if pending_work && !suspended {
            match rx.try_recv() {
                Ok(msg) => Some(msg),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => return,
            }
        } else {
            match rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => return,
            }
        };

        if let Some(message) = message {
            match message {
                BgMessage::Work => pending_work = true,
                BgMessage::Flush { done } => {
                    let result = inner.force_flush();
                    report_background_error(&inner, &result);
                    let _ = done.send(result);
                    pending_work = true;
                }
                BgMessage::ManualCompaction { begin, end, done } => {
                    let result = inner.manual_compaction(begin.as_deref(), end.as_deref());
                    report_background_error(&inner, &result);
                    let _ = done.send(result);
                }
                BgMessage::Suspend(ack) => {
                    suspended = true;
                    let _ = ack.send(());
                }
                BgMessage::Resume => {
                    suspended = false;
                    pending_work = true;
                }
                BgMessage::Shutdown => return,
            }
            continue;
        }

        // Idle channel and work pending: run one bounded unit.
        match inner.background_step() {
            Ok(did_work) => pending_work = did_work,
            Err(e) => {
                // Logged and retried on a later trigger; the manifest is
                // untouched by a failed compaction.
                log::error!("background work failed: {e}");
                record_background_error(&inner, e);
                pending_work = false;
            }
        }
    }
}

fn report_background_error(inner: &Arc<DbInner>, result: &Result<()>) {
    if let Err(e) = result {
        log::error!("background request failed: {e}");
        record_background_error(inner, e.duplicate());
    }
}

/// Park a background failure where writers will see it, and wake any
/// stalled writer so it can observe the error instead of waiting forever.
fn record_background_error(inner: &Arc<DbInner>, error: Error) {
    let mut state = inner.state.lock();
    if state.bg_error.is_none() {
        state.bg_error = Some(error);
    }
    inner.flush_done.notify_all();
}

impl DbInner {
    /// One bounded unit of background work. Returns true if anything was
    /// done (so the caller immediately checks for more).
    pub(crate) fn background_step(&self) -> Result<bool> {
        // Flushing the frozen memtable always comes first: it unblocks
        // stalled writers and feeds level 0.
        let imm = self.state.lock().imm.clone();
        if let Some(imm) = imm {
            self.compact_memtable(&imm)?;
            return Ok(true);
        }

        let compaction = self.state.lock().versions.pick_compaction();
        let Some(compaction) = compaction else {
            return Ok(false);
        };
        if compaction.is_trivial_move() {
            let file = Arc::clone(&compaction.inputs[0][0]);
            let mut state = self.state.lock();
            let mut edit = VersionEdit::new();
            edit.delete_file(compaction.level, file.number);
            edit.add_file(compaction.level + 1, (*file).clone());
            edit.set_compact_pointer(compaction.level, file.largest.clone());
            state.versions.log_and_apply(edit)?;
            log::info!(
                "moved table {:06} from level {} to {}",
                file.number,
                compaction.level,
                compaction.level + 1
            );
            return Ok(true);
        }
        self.do_compaction_work(compaction)?;
        Ok(true)
    }

    /// Flush one frozen memtable into a level-0 table and commit it.
    pub(crate) fn compact_memtable(&self, imm: &Arc<MemTable>) -> Result<()> {
        let started = Instant::now();
        let file_number = self.state.lock().versions.new_file_number();
        let meta = match self.build_table(imm, file_number) {
            Ok(meta) => meta,
            Err(e) => {
                // Never leave a half-written table for the manifest to
                // trip over.
                let _ = fs::remove_file(filenames::table_file(&self.path, file_number));
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        let mut edit = VersionEdit::new();
        // Everything up to the current log is now durably in a table;
        // older logs become obsolete.
        edit.log_number = Some(state.log_number);
        edit.add_file(0, meta.clone());
        state.versions.log_and_apply(edit)?;
        state.imm = None;
        self.flush_done.notify_all();
        self.stats.lock()[0].add(started.elapsed().as_micros() as u64, 0, meta.file_size);
        log::info!(
            "flushed memtable to table {:06} ({} bytes)",
            meta.number,
            meta.file_size
        );
        self.delete_obsolete_files(&mut state);
        Ok(())
    }

    /// Flush pending generations, then the active memtable, synchronously.
    pub(crate) fn force_flush(&self) -> Result<()> {
        loop {
            // The pending-imm check and the freeze decision must happen
            // under one lock hold: a stalled writer may freeze the
            // memtable itself, and that generation must never be
            // overwritten here.
            let imm = {
                let mut state = self.state.lock();
                if let Some(e) = &state.bg_error {
                    return Err(e.duplicate());
                }
                match state.imm.clone() {
                    Some(imm) => imm,
                    None => {
                        if state.mem.is_empty() {
                            return Ok(());
                        }
                        let new_log_number = state.versions.new_file_number();
                        let log = crate::wal::LogWriter::create(&filenames::log_file(
                            &self.path,
                            new_log_number,
                        ))?;
                        state.log = log;
                        state.log_number = new_log_number;
                        let frozen = std::mem::replace(
                            &mut state.mem,
                            Arc::new(MemTable::new(self.icmp.clone())),
                        );
                        state.imm = Some(Arc::clone(&frozen));
                        frozen
                    }
                }
            };
            self.compact_memtable(&imm)?;
        }
    }

    /// User-triggered range compaction: flush, then merge the range down
    /// level by level until no further overlap remains.
    pub(crate) fn manual_compaction(
        &self,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.force_flush()?;
        // Deepest level already holding data in the range: compaction
        // stops there instead of pushing everything to the bottom.
        let max_level = {
            let state = self.state.lock();
            let version = state.versions.current();
            (0..NUM_LEVELS)
                .rev()
                .find(|&level| !version.overlapping_inputs(level, begin, end).is_empty())
        };
        let Some(max_level) = max_level else {
            return Ok(());
        };
        for level in 0..=max_level.min(NUM_LEVELS - 2) {
            loop {
                let compaction = self.state.lock().versions.compact_range(level, begin, end);
                let Some(compaction) = compaction else { break };
                // Manual compaction always rewrites, so overwritten
                // versions and dead tombstones actually get dropped.
                self.do_compaction_work(compaction)?;
            }
        }
        Ok(())
    }

    /// Merge the input tables, drop obsolete entries, write the outputs
    /// to level+1 and commit the swap as one manifest edit.
    fn do_compaction_work(&self, compaction: Compaction) -> Result<()> {
        let started = Instant::now();
        let (smallest_snapshot, version) = {
            let state = self.state.lock();
            let last = state.versions.last_sequence();
            (self.smallest_live_snapshot(last), state.versions.current())
        };
        log::info!(
            "compacting {} files at level {} + {} files at level {}",
            compaction.inputs[0].len(),
            compaction.level,
            compaction.inputs[1].len(),
            compaction.level + 1,
        );

        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        for input in &compaction.inputs {
            for file in input {
                let table = self.table_cache.get_table(file.number)?;
                children.push(Box::new(table.iter()));
            }
        }
        let mut iter = MergeIterator::new(self.icmp.clone(), children);
        iter.seek_to_first()?;

        let mut outputs: Vec<FileMetaData> = Vec::new();
        let mut builder: Option<(TableBuilder, u64)> = None;
        let mut current_user_key: Option<Vec<u8>> = None;
        // Sentinel above any real sequence: the first occurrence of each
        // user key is never dropped as shadowed.
        let mut last_sequence_for_key = u64::MAX;

        let result = (|| -> Result<()> {
            while iter.is_valid() {
                let key = iter.key();
                let (user_key, sequence, value_type) = split_internal_key(key)
                    .ok_or_else(|| Error::Corruption("malformed key in compaction input".into()))?;

                let first_occurrence = current_user_key.as_deref().is_none_or(|current| {
                    self.icmp.user_comparator().compare(user_key, current).is_ne()
                });
                if first_occurrence {
                    current_user_key = Some(user_key.to_vec());
                    last_sequence_for_key = u64::MAX;
                }

                let drop_entry = if last_sequence_for_key <= smallest_snapshot {
                    // A newer version of this key is already visible to
                    // every live snapshot; nobody can see this one.
                    true
                } else {
                    value_type == ValueType::Deletion
                        && sequence <= smallest_snapshot
                        && version.is_base_level_for_key(compaction.level + 1, user_key)
                };
                last_sequence_for_key = sequence;

                if !drop_entry {
                    if builder.is_none() {
                        let number = self.state.lock().versions.new_file_number();
                        let path = filenames::table_file(&self.path, number);
                        builder = Some((
                            TableBuilder::new(&path, self.icmp.clone(), self.opts.table_options())?,
                            number,
                        ));
                    }
                    if let Some((b, _)) = builder.as_mut() {
                        b.add(key, iter.value())?;
                    }
                    let full = builder
                        .as_ref()
                        .is_some_and(|(b, _)| b.file_size_estimate() >= TARGET_FILE_SIZE);
                    if full {
                        let (b, number) = builder.take().expect("builder present");
                        outputs.push(finish_output(b, number)?);
                    }
                }
                iter.next()?;
            }
            if let Some((b, number)) = builder.take() {
                outputs.push(finish_output(b, number)?);
            }
            Ok(())
        })();

        if let Err(e) = result {
            // Abandon the partial outputs; the startup/next-commit sweep
            // reclaims them. The manifest was never touched.
            for meta in &outputs {
                let _ = fs::remove_file(filenames::table_file(&self.path, meta.number));
            }
            if let Some((b, number)) = builder.take() {
                drop(b);
                let _ = fs::remove_file(filenames::table_file(&self.path, number));
            }
            return Err(e);
        }

        let bytes_written: u64 = outputs.iter().map(|m| m.file_size).sum();
        let mut state = self.state.lock();
        let mut edit = VersionEdit::new();
        compaction.add_input_deletions(&mut edit);
        for meta in &outputs {
            edit.add_file(compaction.level + 1, meta.clone());
        }
        // Round-robin: the next compaction at this level resumes past the
        // keyspace just covered.
        let pointer = compaction.inputs[0]
            .iter()
            .map(|f| f.largest.clone())
            .max_by(|a, b| self.icmp.compare(a, b))
            .expect("compaction has level inputs");
        edit.set_compact_pointer(compaction.level, pointer);
        state.versions.log_and_apply(edit)?;

        self.stats.lock()[compaction.level + 1].add(
            started.elapsed().as_micros() as u64,
            compaction.total_input_bytes(),
            bytes_written,
        );
        log::info!(
            "compacted {} input files into {} tables at level {} ({} bytes)",
            compaction.num_input_files(),
            outputs.len(),
            compaction.level + 1,
            bytes_written,
        );
        self.delete_obsolete_files(&mut state);
        Ok(())
    }
}

fn finish_output(builder: TableBuilder, number: u64) -> Result<FileMetaData> {
    let summary = builder.finish()?;
    Ok(FileMetaData {
        number,
        file_size: summary.file_size,
        smallest: summary.smallest,
        largest: summary.largest,
    })
}

/// Best-effort salvage of a damaged store: keep every readable table and
/// every replayable log record, rebuild a fresh manifest with all
/// salvaged tables at level 0, and set unreadable tables aside.
pub(crate) fn repair_store(path: &std::path::Path, opts: &Options) -> Result<()> {
    let ucmp = opts
        .comparator
        .clone()
        .unwrap_or_else(|| Arc::new(crate::comparator::BytewiseComparator));
    let icmp = InternalKeyComparator::new(Arc::clone(&ucmp));

    let mut table_numbers = Vec::new();
    let mut log_numbers = Vec::new();
    let mut old_manifests = Vec::new();
    let mut max_number = 0u64;
    for entry in fs::read_dir(path)?.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((file_type, number)) = filenames::parse_file_name(name) else {
            continue;
        };
        max_number = max_number.max(number);
        match file_type {
            FileType::Table => table_numbers.push(number),
            FileType::Log => log_numbers.push(number),
            FileType::Manifest => old_manifests.push(entry.path()),
            FileType::Current | FileType::Temp => {}
        }
    }
    table_numbers.sort_unstable();
    log_numbers.sort_unstable();

    let mut salvaged: Vec<FileMetaData> = Vec::new();
    let mut max_sequence: SequenceNumber = 0;
    for number in table_numbers {
        match salvage_table(path, number, &icmp, opts) {
            Ok((meta, table_max_seq)) => {
                max_sequence = max_sequence.max(table_max_seq);
                salvaged.push(meta);
            }
            Err(e) => {
                log::warn!("table {number:06} unreadable during repair, setting aside: {e}");
                let from = filenames::table_file(path, number);
                let _ = fs::rename(&from, from.with_extension("sst.lost"));
            }
        }
    }

    let mut versions = VersionSet::new(path, icmp.clone(), opts.max_manifest_size);
    versions.mark_file_number_used(max_number);

    // Convert surviving log records into fresh level-0 tables.
    for number in &log_numbers {
        let mem = Arc::new(MemTable::new(icmp.clone()));
        let mut reader = match LogReader::open(&filenames::log_file(path, *number), false) {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("log {number:06} unreadable during repair: {e}");
                continue;
            }
        };
        loop {
            match reader.read_record() {
                Ok(Some(record)) => {
                    let Ok(batch) = WriteBatch::from_contents(record) else {
                        break;
                    };
                    let mem_ref = Arc::clone(&mem);
                    if batch
                        .for_each(|value_type, sequence, key, value| {
                            mem_ref.add(sequence, value_type, key, value);
                            Ok(())
                        })
                        .is_err()
                    {
                        break;
                    }
                    max_sequence = max_sequence.max(batch.sequence() + batch.count() as u64 - 1);
                }
                Ok(None) | Err(_) => break,
            }
        }
        if mem.is_empty() {
            continue;
        }
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
        salvaged.push(FileMetaData {
            number: file_number,
            file_size: summary.file_size,
            smallest: summary.smallest,
            largest: summary.largest,
        });
    }

    versions.set_last_sequence(max_sequence);
    versions.create_new(ucmp.name())?;
    let mut edit = VersionEdit::new();
    for meta in &salvaged {
        edit.add_file(0, meta.clone());
    }
    versions.log_and_apply(edit)?;

    for manifest in old_manifests {
        if manifest != filenames::manifest_file(path, versions.manifest_number()) {
            let _ = fs::remove_file(manifest);
        }
    }
    for number in log_numbers {
        let _ = fs::remove_file(filenames::log_file(path, number));
    }
    log::info!(
        "repair finished: {} tables salvaged, last sequence {max_sequence}",
        salvaged.len()
    );
    Ok(())
}

/// Scan one table end to end, returning its manifest metadata and the
/// largest sequence number it holds.
fn salvage_table(
    path: &std::path::Path,
    number: u64,
    icmp: &InternalKeyComparator,
    opts: &Options,
) -> Result<(FileMetaData, SequenceNumber)> {
    let table_path = filenames::table_file(path, number);
    let file_size = fs::metadata(&table_path)?.len();
    let table = Arc::new(Table::open(
        &table_path,
        number,
        icmp.clone(),
        opts.table_options(),
        None,
    )?);
    let mut iter = table.iter();
    iter.seek_to_first()?;
    let mut smallest: Option<Vec<u8>> = None;
    let mut largest: Option<Vec<u8>> = None;
    let mut max_sequence = 0;
    while iter.is_valid() {
        let key = iter.key().to_vec();
        let (_, sequence, _) = split_internal_key(&key)
            .ok_or_else(|| Error::Corruption("malformed key in table".into()))?;
        max_sequence = max_sequence.max(sequence);
        if smallest.is_none() {
            smallest = Some(key.clone());
        }
        largest = Some(key);
        iter.next()?;
    }
    let (Some(smallest), Some(largest)) = (smallest, largest) else {
        return Err(Error::Corruption("table holds no entries".into()));
    };
    Ok((
        FileMetaData {
            number,
            file_size,
            smallest,
            largest,
        },
        max_sequence,
    ))
}

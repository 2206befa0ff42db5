use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::wal::{BLOCK_SIZE, HEADER_SIZE, RecordType, fragment_crc};

/// Appends logical records to a log file, fragmenting across physical
/// blocks.
///
/// Every write must be durable before it's acknowledged to the client
/// (when the caller asks for sync). Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
///
/// If any fragment write fails the whole append fails; a partially
/// appended record is detected by CRC on replay and never considered
/// committed.
pub struct LogWriter {
    writer: BufWriter<File>,
    /// Write position within the current physical block.
    block_offset: usize,
    /// Total bytes handed to the writer (including padding and headers).
    offset: u64,
}

impl LogWriter {
    /// Create a new log file at `path`, truncating any existing file.
    pub fn create(path: &Path) -> Result<LogWriter> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(LogWriter::new(file, 0))
    }

    /// Wrap an already-open file positioned at `initial_offset` bytes.
    pub fn new(file: File, initial_offset: u64) -> LogWriter {
        LogWriter {
            writer: BufWriter::new(file),
            block_offset: (initial_offset as usize) % BLOCK_SIZE,
            offset: initial_offset,
        }
    }

    /// Append one logical record, splitting it into fragments as needed.
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let mut left = record;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Not enough room for a header: pad out the block.
                if leftover > 0 {
                    self.writer.write_all(&[0u8; HEADER_SIZE - 1][..leftover])?;
                    self.offset += leftover as u64;
                }
                self.block_offset = 0;
            }

            let available = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(available);
            let end = fragment_len == left.len();
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, false) => RecordType::Middle,
                (false, true) => RecordType::Last,
            };

            self.emit_fragment(record_type, &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;
            if end {
                break;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    fn emit_fragment(&mut self, record_type: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= u16::MAX as usize);
        let crc = fragment_crc(record_type, payload);
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&(payload.len() as u16).to_le_bytes())?;
        self.writer.write_all(&[record_type as u8])?;
        self.writer.write_all(payload)?;
        self.block_offset += HEADER_SIZE + payload.len();
        self.offset += (HEADER_SIZE + payload.len()) as u64;
        Ok(())
    }

    /// Force fsync to disk. Ensures all appended records are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Bytes written so far (used for manifest rotation decisions).
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::wal::{BLOCK_SIZE, HEADER_SIZE, RecordType, fragment_crc};

/// Reads logical records back from a log file for crash recovery.
///
/// Loads the entire file into memory, then yields record by record,
/// reassembling fragments. On a CRC mismatch or a header running past the
/// end of the file the reader stops: the crash happened here and nothing
/// valid can follow. Under paranoid checks that same condition is an
/// error instead of a silent stop.
pub struct LogReader {
    data: Vec<u8>,
    offset: usize,
    paranoid: bool,
    /// Set once a malformed tail was seen; later reads keep returning None.
    exhausted: bool,
}

impl LogReader {
    /// Open a log file for reading.
    pub fn open(path: &Path, paranoid: bool) -> Result<LogReader> {
        let data = fs::read(path)?;
        Ok(LogReader {
            data,
            offset: 0,
            paranoid,
            exhausted: false,
        })
    }

    #[cfg(test)]
    pub fn from_bytes(data: Vec<u8>, paranoid: bool) -> LogReader {
        LogReader {
            data,
            offset: 0,
            paranoid,
            exhausted: false,
        }
    }

    /// Read the next logical record. `Ok(None)` at end of log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut assembled: Option<Vec<u8>> = None;
        loop {
            match self.read_fragment()? {
                None => {
                    // Truncated tail. A half-assembled record is the
                    // expected outcome of a crash mid-append; drop it.
                    if assembled.is_some() && self.paranoid {
                        return Err(Error::Corruption(
                            "log ends inside a fragmented record".into(),
                        ));
                    }
                    return Ok(None);
                }
                Some((RecordType::Full, payload)) => {
                    if assembled.is_some() {
                        return self.tail_error("FULL fragment inside a fragmented record");
                    }
                    return Ok(Some(payload));
                }
                Some((RecordType::First, payload)) => {
                    if assembled.is_some() {
                        return self.tail_error("FIRST fragment inside a fragmented record");
                    }
                    assembled = Some(payload);
                }
                Some((RecordType::Middle, payload)) => match assembled.as_mut() {
                    Some(buf) => buf.extend_from_slice(&payload),
                    None => return self.tail_error("MIDDLE fragment without FIRST"),
                },
                Some((RecordType::Last, payload)) => match assembled.take() {
                    Some(mut buf) => {
                        buf.extend_from_slice(&payload);
                        return Ok(Some(buf));
                    }
                    None => return self.tail_error("LAST fragment without FIRST"),
                },
                Some((RecordType::Zero, _)) => {
                    return self.tail_error("zeroed fragment header");
                }
            }
        }
    }

    /// Read all remaining records.
    pub fn read_all(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// One physical fragment, or None at a (possibly truncated) end.
    fn read_fragment(&mut self) -> Result<Option<(RecordType, Vec<u8>)>> {
        loop {
            let block_remaining = BLOCK_SIZE - (self.offset % BLOCK_SIZE);
            if block_remaining < HEADER_SIZE {
                // Trailer padding; skip to the next block boundary.
                self.offset += block_remaining;
                continue;
            }
            if self.offset + HEADER_SIZE > self.data.len() {
                return self.mark_tail("log header truncated");
            }
            let header = &self.data[self.offset..self.offset + HEADER_SIZE];
            let stored_crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let length = u16::from_le_bytes(header[4..6].try_into().unwrap()) as usize;
            let type_byte = header[6];

            if type_byte == RecordType::Zero as u8 && length == 0 && stored_crc == 0 {
                // Preallocated / padded region: nothing follows.
                return self.mark_tail("zero-filled log tail");
            }
            let Some(record_type) = RecordType::from_u8(type_byte) else {
                return self.mark_tail("unknown fragment type");
            };
            if HEADER_SIZE + length > block_remaining {
                return self.mark_tail("fragment overruns block");
            }
            let payload_start = self.offset + HEADER_SIZE;
            if payload_start + length > self.data.len() {
                return self.mark_tail("fragment payload truncated");
            }
            let payload = &self.data[payload_start..payload_start + length];
            if fragment_crc(record_type, payload) != stored_crc {
                return self.mark_tail("fragment CRC mismatch");
            }
            self.offset = payload_start + length;
            return Ok(Some((record_type, payload.to_vec())));
        }
    }

    fn mark_tail<T>(&mut self, reason: &str) -> Result<Option<T>> {
        self.exhausted = true;
        if self.paranoid {
            return Err(Error::Corruption(format!("log tail: {reason}")));
        }
        log::warn!("log replay stopped: {reason}");
        Ok(None)
    }

    fn tail_error<T>(&mut self, reason: &str) -> Result<Option<T>> {
        self.mark_tail(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::LogWriter;
    use tempfile::tempdir;

    fn roundtrip(records: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut writer = LogWriter::create(&path).unwrap();
        for record in records {
            writer.add_record(record).unwrap();
        }
        writer.sync().unwrap();
        let mut reader = LogReader::open(&path, false).unwrap();
        reader.read_all().unwrap()
    }

    #[test]
    fn small_records_roundtrip() {
        let records = vec![b"one".to_vec(), b"two".to_vec(), Vec::new(), b"three".to_vec()];
        assert_eq!(roundtrip(&records), records);
    }

    #[test]
    fn record_spanning_blocks_roundtrips() {
        // Larger than two blocks: forces FIRST/MIDDLE/LAST fragments.
        let big = vec![0xabu8; BLOCK_SIZE * 2 + 1234];
        let records = vec![b"pre".to_vec(), big.clone(), b"post".to_vec()];
        assert_eq!(roundtrip(&records), records);
    }

    #[test]
    fn truncated_tail_is_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.add_record(b"complete").unwrap();
        writer.add_record(b"casualty").unwrap();
        writer.sync().unwrap();

        // Chop mid-way through the second record's fragment.
        let mut data = std::fs::read(&path).unwrap();
        data.truncate(data.len() - 4);

        let mut reader = LogReader::from_bytes(data, false);
        let records = reader.read_all().unwrap();
        assert_eq!(records, vec![b"complete".to_vec()]);
    }

    #[test]
    fn truncated_tail_is_fatal_when_paranoid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.add_record(b"complete").unwrap();
        writer.add_record(b"casualty").unwrap();
        writer.sync().unwrap();

        let mut data = std::fs::read(&path).unwrap();
        data.truncate(data.len() - 4);

        let mut reader = LogReader::from_bytes(data, true);
        assert!(reader.read_record().unwrap().is_some());
        assert!(reader.read_record().is_err());
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.add_record(b"first").unwrap();
        writer.add_record(b"second").unwrap();
        writer.sync().unwrap();

        let mut data = std::fs::read(&path).unwrap();
        // Flip a payload byte of the second record.
        let n = data.len();
        data[n - 1] ^= 0xff;

        let mut reader = LogReader::from_bytes(data, false);
        assert_eq!(reader.read_all().unwrap(), vec![b"first".to_vec()]);
    }
}

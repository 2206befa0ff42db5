use std::sync::Arc;

use crate::encoding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice, put_varint32,
    put_varint64,
};
use crate::error::{Error, Result};
use crate::manifest::NUM_LEVELS;

/// Everything the manifest needs to know about one sorted table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetaData {
    /// Unique file number (names the `.sst` file).
    pub number: u64,
    /// File size in bytes.
    pub file_size: u64,
    /// Smallest encoded internal key in the table.
    pub smallest: Vec<u8>,
    /// Largest encoded internal key in the table.
    pub largest: Vec<u8>,
}

/// Field tags in the encoded edit record.
mod tag {
    pub const COMPARATOR: u32 = 1;
    pub const LOG_NUMBER: u32 = 2;
    pub const NEXT_FILE_NUMBER: u32 = 3;
    pub const LAST_SEQUENCE: u32 = 4;
    pub const COMPACT_POINTER: u32 = 5;
    pub const DELETED_FILE: u32 = 6;
    pub const NEW_FILE: u32 = 7;
}

/// A delta between two manifest versions: files added and removed per
/// level, plus bookkeeping pointers. Edits are appended to the manifest
/// log; replaying them from an empty state reproduces the live version.
#[derive(Debug, Default, Clone)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,
    pub compact_pointers: Vec<(usize, Vec<u8>)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> VersionEdit {
        VersionEdit::default()
    }

    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        debug_assert!(level < NUM_LEVELS);
        self.new_files.push((level, file));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        debug_assert!(level < NUM_LEVELS);
        self.deleted_files.push((level, number));
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: Vec<u8>) {
        self.compact_pointers.push((level, key));
    }

    /// Serialize to one manifest log record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(name) = &self.comparator_name {
            put_varint32(&mut buf, tag::COMPARATOR);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(&mut buf, tag::LOG_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(&mut buf, tag::NEXT_FILE_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(&mut buf, tag::LAST_SEQUENCE);
            put_varint64(&mut buf, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, tag::COMPACT_POINTER);
            put_varint32(&mut buf, *level as u32);
            put_length_prefixed_slice(&mut buf, key);
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut buf, tag::DELETED_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, *number);
        }
        for (level, file) in &self.new_files {
            put_varint32(&mut buf, tag::NEW_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, file.number);
            put_varint64(&mut buf, file.file_size);
            put_length_prefixed_slice(&mut buf, &file.smallest);
            put_length_prefixed_slice(&mut buf, &file.largest);
        }
        buf
    }

    /// Parse one manifest log record.
    pub fn decode(mut data: &[u8]) -> Result<VersionEdit> {
        let mut edit = VersionEdit::new();
        while !data.is_empty() {
            let (field, consumed) = get_varint32(data)?;
            data = &data[consumed..];
            match field {
                tag::COMPARATOR => {
                    let (name, consumed) = get_length_prefixed_slice(data)?;
                    data = &data[consumed..];
                    edit.comparator_name = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Error::Corruption("comparator name not utf-8".into()))?,
                    );
                }
                tag::LOG_NUMBER => {
                    let (n, consumed) = get_varint64(data)?;
                    data = &data[consumed..];
                    edit.log_number = Some(n);
                }
                tag::NEXT_FILE_NUMBER => {
                    let (n, consumed) = get_varint64(data)?;
                    data = &data[consumed..];
                    edit.next_file_number = Some(n);
                }
                tag::LAST_SEQUENCE => {
                    let (n, consumed) = get_varint64(data)?;
                    data = &data[consumed..];
                    edit.last_sequence = Some(n);
                }
                tag::COMPACT_POINTER => {
                    let (level, consumed) = get_varint32(data)?;
                    data = &data[consumed..];
                    let (key, consumed) = get_length_prefixed_slice(data)?;
                    data = &data[consumed..];
                    edit.compact_pointers
                        .push((check_level(level)?, key.to_vec()));
                }
                tag::DELETED_FILE => {
                    let (level, consumed) = get_varint32(data)?;
                    data = &data[consumed..];
                    let (number, consumed) = get_varint64(data)?;
                    data = &data[consumed..];
                    edit.deleted_files.push((check_level(level)?, number));
                }
                tag::NEW_FILE => {
                    let (level, consumed) = get_varint32(data)?;
                    data = &data[consumed..];
                    let (number, consumed) = get_varint64(data)?;
                    data = &data[consumed..];
                    let (file_size, consumed) = get_varint64(data)?;
                    data = &data[consumed..];
                    let (smallest, consumed) = get_length_prefixed_slice(data)?;
                    data = &data[consumed..];
                    let (largest, consumed) = get_length_prefixed_slice(data)?;
                    data = &data[consumed..];
                    edit.new_files.push((
                        check_level(level)?,
                        FileMetaData {
                            number,
                            file_size,
                            smallest: smallest.to_vec(),
                            largest: largest.to_vec(),
                        },
                    ));
                }
                other => {
                    return Err(Error::Corruption(format!(
                        "unknown manifest edit field tag: {other}"
                    )));
                }
            }
        }
        Ok(edit)
    }
}

fn check_level(level: u32) -> Result<usize> {
    let level = level as usize;
    if level >= NUM_LEVELS {
        return Err(Error::Corruption(format!(
            "manifest references level {level}, max is {}",
            NUM_LEVELS - 1
        )));
    }
    Ok(level)
}

/// Shared handle to a file's metadata. Versions share these across
/// generations, so a table's bookkeeping is allocated once.
pub type FileMetaHandle = Arc<FileMetaData>;

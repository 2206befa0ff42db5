//! File naming within a database directory.
//!
//! ```text
//! 000007.log        — write-ahead log for one write-buffer generation
//! 000012.sst        — sorted table
//! MANIFEST-000005   — version-edit log
//! CURRENT           — names the live manifest
//! 000009.dbtmp      — scratch file, atomically renamed into place
//! ```

use std::path::{Path, PathBuf};

/// The kind of file a directory entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    Table,
    Manifest,
    Current,
    Temp,
}

pub fn log_file(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.log"))
}

pub fn table_file(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.sst"))
}

pub fn manifest_file(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{number:06}"))
}

pub fn current_file(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

pub fn temp_file(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.dbtmp"))
}

/// Parse a directory entry name. Returns the file's type and number
/// (0 for CURRENT), or None for files the engine doesn't own.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "CURRENT" {
        return Some((FileType::Current, 0));
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return rest.parse().ok().map(|n| (FileType::Manifest, n));
    }
    if let Some(stem) = name.strip_suffix(".log") {
        return stem.parse().ok().map(|n| (FileType::Log, n));
    }
    if let Some(stem) = name.strip_suffix(".sst") {
        return stem.parse().ok().map(|n| (FileType::Table, n));
    }
    if let Some(stem) = name.strip_suffix(".dbtmp") {
        return stem.parse().ok().map(|n| (FileType::Temp, n));
    }
    None
}

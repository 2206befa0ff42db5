//! # stratadb
//!
//! A persistent, ordered, embedded key-value store built on the
//! Log-Structured Merge-Tree design.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! This turns random writes into sequential writes — 100-1000x faster
//! on real hardware.
//!
//! On top of that skeleton sit the guarantees callers actually use:
//! atomic write batches, point-in-time snapshot isolation, bidirectional
//! range iteration, and online space reclamation that never deletes data
//! a live snapshot can still see.

pub mod batch;
pub mod bloom;
pub mod cache;
pub mod compaction;
pub mod comparator;
pub mod compress;
pub mod db;
pub mod encoding;
pub mod error;
pub mod filenames;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use batch::WriteBatch;
pub use comparator::{BytewiseComparator, Comparator};
pub use compress::CompressionType;
pub use db::{DB, Options, ReadOptions, Snapshot, WriteOptions};
pub use error::{Error, Result};
pub use iterator::DbIterator;

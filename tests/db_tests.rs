// Core database behavior: reads, writes, batches, flushes, snapshots.

use stratadb::{DB, Error, Options, ReadOptions, WriteBatch, WriteOptions};
use tempfile::tempdir;

fn open_default(dir: &std::path::Path) -> DB {
    DB::open(dir, Options::default()).unwrap()
}

// =============================================================================
// Test 1: put / get / delete roundtrip
// =============================================================================
#[test]
fn put_get_delete() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"hello", b"world").unwrap();
    assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));

    db.delete(b"hello").unwrap();
    assert_eq!(db.get(b"hello").unwrap(), None);

    assert_eq!(db.get(b"never-written").unwrap(), None);
}

// =============================================================================
// Test 2: overwrite returns the most recent value
// =============================================================================
#[test]
fn overwrite_returns_latest() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"key", b"v1").unwrap();
    db.put(b"key", b"v2").unwrap();
    db.put(b"key", b"v3").unwrap();
    assert_eq!(db.get(b"key").unwrap(), Some(b"v3".to_vec()));
}

// =============================================================================
// Test 3: a batch applies atomically and in order — put,put,delete,put on
// one key leaves the last put
// =============================================================================
#[test]
fn batch_last_operation_wins() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    let mut batch = WriteBatch::new();
    batch.put(b"k", b"first");
    batch.put(b"k", b"second");
    batch.delete(b"k");
    batch.put(b"k", b"final");
    assert_eq!(batch.count(), 4);
    db.write(batch).unwrap();

    assert_eq!(db.get(b"k").unwrap(), Some(b"final".to_vec()));
}

// =============================================================================
// Test 4: batch approximate size equals header plus the sum of each
// operation's encoded size
// =============================================================================
#[test]
fn batch_approximate_size_sums_operations() {
    use stratadb::encoding::varint_length;

    let mut batch = WriteBatch::new();
    let header = batch.approximate_size();

    let mut expected = header;
    for (key, value) in [(b"k".as_ref(), b"val1".as_ref()), (b"key2", b"v2"), (b"k3", b"x")] {
        batch.put(key, value);
        expected += 1
            + varint_length(key.len() as u64)
            + key.len()
            + varint_length(value.len() as u64)
            + value.len();
    }
    batch.delete(b"k");
    expected += 1 + varint_length(1) + 1;

    assert_eq!(batch.approximate_size(), expected);
}

// =============================================================================
// Test 5: oversized batches are rejected as configuration errors
// =============================================================================
#[test]
fn oversized_batch_rejected() {
    let dir = tempdir().unwrap();
    let db = DB::open(
        dir.path(),
        Options {
            max_batch_size: 3,
            ..Options::default()
        },
    )
    .unwrap();

    let mut batch = WriteBatch::new();
    for i in 0..4u32 {
        batch.put(format!("k{i}").as_bytes(), b"v");
    }
    assert!(matches!(
        db.write(batch),
        Err(Error::InvalidArgument(_))
    ));
}

// =============================================================================
// Test 6: small write buffer forces multiple level-0 tables; a full scan
// still returns every key exactly once, in order
// =============================================================================
#[test]
fn two_flushes_and_full_scan() {
    let dir = tempdir().unwrap();
    let db = DB::open(
        dir.path(),
        Options {
            write_buffer_size: 100 * 1024,
            ..Options::default()
        },
    )
    .unwrap();

    for i in 0..10_000u32 {
        let key = format!("k{i:05}");
        let value: String = key.chars().rev().collect();
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    db.flush().unwrap();

    let level0: usize = db
        .property("stratadb.num-files-at-level0")
        .unwrap()
        .parse()
        .unwrap();
    assert!(level0 >= 2, "expected at least two level-0 tables, got {level0}");

    let mut iter = db.iter().unwrap();
    iter.seek_to_first().unwrap();
    let mut count = 0u32;
    let mut previous: Option<Vec<u8>> = None;
    while iter.valid() {
        let key = iter.key().to_vec();
        if let Some(prev) = &previous {
            assert!(prev < &key, "keys out of order or duplicated");
        }
        let expected: String = String::from_utf8(key.clone())
            .unwrap()
            .chars()
            .rev()
            .collect();
        assert_eq!(iter.value(), expected.as_bytes());
        previous = Some(key);
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 10_000);

    // Spot-check point reads across flushed tables.
    assert_eq!(db.get(b"k00000").unwrap(), Some(b"00000k".to_vec()));
    assert_eq!(db.get(b"k09999").unwrap(), Some(b"99990k".to_vec()));
}

// =============================================================================
// Test 7: snapshot isolation — writes after a snapshot never change reads
// through it
// =============================================================================
#[test]
fn snapshot_sees_frozen_state() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"a", b"1").unwrap();
    let snap = db.snapshot();

    db.delete(b"a").unwrap();
    db.put(b"b", b"2").unwrap();

    assert_eq!(db.get(b"a").unwrap(), None);
    let at_snap = ReadOptions {
        snapshot: Some(snap.clone()),
    };
    assert_eq!(db.get_opt(&at_snap, b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get_opt(&at_snap, b"b").unwrap(), None);
    snap.release();
}

// =============================================================================
// Test 8: snapshot survives a flush of the data it pins
// =============================================================================
#[test]
fn snapshot_survives_flush() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"key", b"old").unwrap();
    let snap = db.snapshot();
    db.put(b"key", b"new").unwrap();
    db.flush().unwrap();

    let at_snap = ReadOptions {
        snapshot: Some(snap),
    };
    assert_eq!(db.get_opt(&at_snap, b"key").unwrap(), Some(b"old".to_vec()));
    assert_eq!(db.get(b"key").unwrap(), Some(b"new".to_vec()));
}

// =============================================================================
// Test 9: a write can return the snapshot taken just after it
// =============================================================================
#[test]
fn write_returns_post_write_snapshot() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    let write_opts = WriteOptions {
        sync: false,
        snapshot: true,
    };
    let snap = db.put_opt(&write_opts, b"k", b"v1").unwrap().unwrap();
    db.put(b"k", b"v2").unwrap();

    let at_snap = ReadOptions {
        snapshot: Some(snap),
    };
    assert_eq!(db.get_opt(&at_snap, b"k").unwrap(), Some(b"v1".to_vec()));

    // Without the flag, no snapshot comes back.
    assert!(db.put_opt(&WriteOptions::default(), b"x", b"y").unwrap().is_none());
}

// =============================================================================
// Test 10: synchronous writes reach disk through the same API
// =============================================================================
#[test]
fn sync_write_roundtrip() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    let sync = WriteOptions {
        sync: true,
        snapshot: false,
    };
    db.put_opt(&sync, b"durable", b"yes").unwrap();
    assert_eq!(db.get(b"durable").unwrap(), Some(b"yes".to_vec()));
}

// =============================================================================
// Test 11: properties report files, memory usage and stats
// =============================================================================
#[test]
fn properties_answer() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    db.put(b"k", b"v").unwrap();
    assert_eq!(
        db.property("stratadb.num-files-at-level0").unwrap(),
        "0".to_string()
    );
    db.flush().unwrap();
    assert_eq!(
        db.property("stratadb.num-files-at-level0").unwrap(),
        "1".to_string()
    );

    let usage: usize = db
        .property("stratadb.approximate-memory-usage")
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(usage, 0, "memtable drained by flush");

    assert!(db.property("stratadb.stats").is_some());
    assert!(db.property("stratadb.sstables").is_some());
    assert!(db.property("stratadb.nonsense").is_none());
    assert!(db.property("other.stats").is_none());
}

// =============================================================================
// Test 12: approximate sizes grow with flushed data in range
// =============================================================================
#[test]
fn approximate_sizes_reflect_data() {
    let dir = tempdir().unwrap();
    let db = open_default(dir.path());

    for i in 0..1000u32 {
        let key = format!("key{i:04}");
        db.put(key.as_bytes(), &[0u8; 128]).unwrap();
    }
    db.flush().unwrap();

    let sizes = db
        .approximate_sizes(&[
            (b"key0000", b"key9999"),
            (b"nothing-here-a", b"nothing-here-b"),
        ])
        .unwrap();
    assert!(sizes[0] > 0, "populated range should have nonzero size");
    assert_eq!(sizes[1], 0, "empty range should be zero");
}

// =============================================================================
// Test 13: open honors create_if_missing / error_if_exists
// =============================================================================
#[test]
fn open_flags() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("sub");
    let err = DB::open(
        &missing,
        Options {
            create_if_missing: false,
            ..Options::default()
        },
    );
    assert!(matches!(err, Err(Error::InvalidArgument(_))));

    {
        let _db = open_default(dir.path());
    }
    let err = DB::open(
        dir.path(),
        Options {
            error_if_exists: true,
            ..Options::default()
        },
    );
    assert!(matches!(err, Err(Error::InvalidArgument(_))));
}

// =============================================================================
// Test 14: destroy removes every engine file
// =============================================================================
#[test]
fn destroy_removes_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store");
    {
        let db = DB::open(&path, Options::default()).unwrap();
        db.put(b"k", b"v").unwrap();
        db.flush().unwrap();
    }
    DB::destroy(&path, Options::default()).unwrap();
    assert!(!path.join("CURRENT").exists());
    assert!(!path.exists() || std::fs::read_dir(&path).unwrap().next().is_none());
}

// =============================================================================
// Test 15: concurrent readers and writer make progress together
// =============================================================================
#[test]
fn concurrent_reads_and_writes() {
    use std::sync::Arc;

    let dir = tempdir().unwrap();
    let db = Arc::new(DB::open(
        dir.path(),
        Options {
            write_buffer_size: 64 * 1024,
            ..Options::default()
        },
    )
    .unwrap());

    for i in 0..500u32 {
        db.put(format!("seed{i:04}").as_bytes(), b"v").unwrap();
    }

    let writer = {
        let db = Arc::clone(&db);
        std::thread::spawn(move || {
            for i in 0..2000u32 {
                db.put(format!("w{i:05}").as_bytes(), &[7u8; 64]).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    let got = db.get(format!("seed{i:04}").as_bytes()).unwrap();
                    assert_eq!(got, Some(b"v".to_vec()));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

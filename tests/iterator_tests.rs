// Bidirectional iteration: seeks, direction reversal, snapshot bounds,
// tombstone masking. Direction changes are the most error-prone part of
// the merged cursor, so they get the densest coverage.

use stratadb::{DB, Options, ReadOptions};
use tempfile::tempdir;

fn db_with_keys(dir: &std::path::Path, keys: &[(&str, &str)]) -> DB {
    let db = DB::open(dir, Options::default()).unwrap();
    for (key, value) in keys {
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    db
}

// =============================================================================
// Test 1: forward scan yields keys in ascending comparator order
// =============================================================================
#[test]
fn forward_scan_in_order() {
    let dir = tempdir().unwrap();
    let db = db_with_keys(
        dir.path(),
        &[("cherry", "3"), ("apple", "1"), ("banana", "2")],
    );

    let mut iter = db.iter().unwrap();
    assert!(!iter.valid());
    iter.seek_to_first().unwrap();

    let mut seen = Vec::new();
    while iter.valid() {
        seen.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (b"apple".to_vec(), b"1".to_vec()),
            (b"banana".to_vec(), b"2".to_vec()),
            (b"cherry".to_vec(), b"3".to_vec()),
        ]
    );
}

// =============================================================================
// Test 2: backward scan is the exact mirror of forward
// =============================================================================
#[test]
fn backward_scan_mirrors_forward() {
    let dir = tempdir().unwrap();
    let keys: Vec<(String, String)> = (0..200)
        .map(|i| (format!("key{i:04}"), format!("v{i}")))
        .collect();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    for (key, value) in &keys {
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }

    let mut iter = db.iter().unwrap();
    iter.seek_to_last().unwrap();
    let mut backward = Vec::new();
    while iter.valid() {
        backward.push(iter.key().to_vec());
        iter.prev().unwrap();
    }
    backward.reverse();

    let forward: Vec<Vec<u8>> = keys.iter().map(|(k, _)| k.clone().into_bytes()).collect();
    assert_eq!(backward, forward);
}

// =============================================================================
// Test 3: reversing direction at any position yields the entry
// immediately preceding the current one, and forward/backward pairs are
// idempotent in position
// =============================================================================
#[test]
fn direction_reversal_is_consistent() {
    let dir = tempdir().unwrap();
    let db = db_with_keys(
        dir.path(),
        &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")],
    );

    let mut iter = db.iter().unwrap();
    iter.seek_to_first().unwrap();
    let mut walked = vec![iter.key().to_vec()];
    while {
        iter.next().unwrap();
        iter.valid()
    } {
        walked.push(iter.key().to_vec());
    }
    assert_eq!(walked.len(), 5);

    // At every interior position: prev gives the predecessor, and
    // next/prev round-trips stay put.
    for position in 1..walked.len() {
        iter.seek(&walked[position]).unwrap();
        assert_eq!(iter.key(), walked[position].as_slice());

        iter.prev().unwrap();
        assert_eq!(iter.key(), walked[position - 1].as_slice());

        iter.next().unwrap();
        assert_eq!(iter.key(), walked[position].as_slice());

        iter.prev().unwrap();
        iter.next().unwrap();
        assert_eq!(iter.key(), walked[position].as_slice());
    }
}

// =============================================================================
// Test 4: seek lands on the first key at or after the target;
// seek_for_prev on the last key at or before it
// =============================================================================
#[test]
fn seek_and_seek_for_prev() {
    let dir = tempdir().unwrap();
    let db = db_with_keys(dir.path(), &[("b", "2"), ("d", "4"), ("f", "6")]);

    let mut iter = db.iter().unwrap();

    iter.seek(b"d").unwrap();
    assert_eq!(iter.key(), b"d");
    iter.seek(b"c").unwrap();
    assert_eq!(iter.key(), b"d");
    iter.seek(b"a").unwrap();
    assert_eq!(iter.key(), b"b");
    iter.seek(b"g").unwrap();
    assert!(!iter.valid());

    iter.seek_for_prev(b"d").unwrap();
    assert_eq!(iter.key(), b"d");
    iter.seek_for_prev(b"e").unwrap();
    assert_eq!(iter.key(), b"d");
    iter.seek_for_prev(b"g").unwrap();
    assert_eq!(iter.key(), b"f");
    iter.seek_for_prev(b"a").unwrap();
    assert!(!iter.valid());
}

// =============================================================================
// Test 5: deleted keys never surface, in either direction
// =============================================================================
#[test]
fn tombstones_are_invisible() {
    let dir = tempdir().unwrap();
    let db = db_with_keys(dir.path(), &[("a", "1"), ("b", "2"), ("c", "3")]);
    db.delete(b"b").unwrap();

    let mut iter = db.iter().unwrap();
    iter.seek_to_first().unwrap();
    assert_eq!(iter.key(), b"a");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"c");
    iter.next().unwrap();
    assert!(!iter.valid());

    iter.seek_to_last().unwrap();
    assert_eq!(iter.key(), b"c");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"a");
    iter.prev().unwrap();
    assert!(!iter.valid());

    // Seeking at the tombstoned key skips over it.
    iter.seek(b"b").unwrap();
    assert_eq!(iter.key(), b"c");
}

// =============================================================================
// Test 6: only the newest visible version of a key surfaces
// =============================================================================
#[test]
fn scan_shows_only_newest_version() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    db.put(b"k", b"v1").unwrap();
    db.flush().unwrap();
    db.put(b"k", b"v2").unwrap();
    db.put(b"k", b"v3").unwrap();

    let mut iter = db.iter().unwrap();
    iter.seek_to_first().unwrap();
    assert_eq!(iter.key(), b"k");
    assert_eq!(iter.value(), b"v3");
    iter.next().unwrap();
    assert!(!iter.valid());
}

// =============================================================================
// Test 7: an iterator bounded by a snapshot ignores later writes
// =============================================================================
#[test]
fn snapshot_bounded_iteration() {
    let dir = tempdir().unwrap();
    let db = db_with_keys(dir.path(), &[("a", "old-a"), ("b", "old-b")]);

    let snap = db.snapshot();
    db.put(b"a", b"new-a").unwrap();
    db.put(b"c", b"new-c").unwrap();
    db.delete(b"b").unwrap();

    let read_opts = ReadOptions {
        snapshot: Some(snap),
    };
    let mut iter = db.iter_opt(&read_opts).unwrap();
    iter.seek_to_first().unwrap();

    let mut seen = Vec::new();
    while iter.valid() {
        seen.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), b"old-a".to_vec()),
            (b"b".to_vec(), b"old-b".to_vec()),
        ]
    );
}

// =============================================================================
// Test 8: iteration fuses memtable and flushed tables seamlessly
// =============================================================================
#[test]
fn scan_across_memtable_and_tables() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    for i in (0..100).step_by(2) {
        db.put(format!("key{i:03}").as_bytes(), b"flushed").unwrap();
    }
    db.flush().unwrap();
    for i in (1..100).step_by(2) {
        db.put(format!("key{i:03}").as_bytes(), b"in-memory").unwrap();
    }

    let mut iter = db.iter().unwrap();
    iter.seek_to_first().unwrap();
    let mut count = 0;
    for i in 0..100 {
        assert!(iter.valid(), "ran out of keys at {i}");
        assert_eq!(iter.key(), format!("key{i:03}").as_bytes());
        let expected: &[u8] = if i % 2 == 0 { b"flushed" } else { b"in-memory" };
        assert_eq!(iter.value(), expected);
        iter.next().unwrap();
        count += 1;
    }
    assert_eq!(count, 100);
    assert!(!iter.valid());
}

// =============================================================================
// Test 9: a long-lived iterator is unaffected by writes made after its
// creation
// =============================================================================
#[test]
fn iterator_is_a_stable_view() {
    let dir = tempdir().unwrap();
    let db = db_with_keys(dir.path(), &[("a", "1"), ("b", "2")]);

    let mut iter = db.iter().unwrap();
    db.put(b"aa", b"late").unwrap();
    db.delete(b"b").unwrap();

    iter.seek_to_first().unwrap();
    assert_eq!(iter.key(), b"a");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"b");
    assert_eq!(iter.value(), b"2");
    iter.next().unwrap();
    assert!(!iter.valid());
}

// Compaction: manual range compaction, version dropping, tombstone
// reclamation, snapshot protection, suspend/resume.

use stratadb::{DB, Options, ReadOptions};
use tempfile::tempdir;

fn level_files(db: &DB, level: usize) -> usize {
    db.property(&format!("stratadb.num-files-at-level{level}"))
        .unwrap()
        .parse()
        .unwrap()
}

// =============================================================================
// Test 1: compact_range merges overlapping level-0 tables into level 1
// =============================================================================
#[test]
fn compact_range_moves_data_down() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    for round in 0..3 {
        for i in 0..50u32 {
            let key = format!("key{i:03}");
            let value = format!("round{round}");
            db.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        db.flush().unwrap();
    }
    assert_eq!(level_files(&db, 0), 3);

    db.compact_range(None, None).unwrap();
    assert_eq!(level_files(&db, 0), 0);
    assert!(level_files(&db, 1) > 0);

    // Every key holds the newest round's value.
    for i in 0..50u32 {
        let key = format!("key{i:03}");
        assert_eq!(
            db.get(key.as_bytes()).unwrap(),
            Some(b"round2".to_vec()),
            "wrong value for {key} after compaction"
        );
    }
}

// =============================================================================
// Test 2: compaction never loses live entries and never resurrects
// deleted ones
// =============================================================================
#[test]
fn compaction_preserves_and_buries() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    for i in 0..100u32 {
        db.put(format!("k{i:03}").as_bytes(), b"live").unwrap();
    }
    db.flush().unwrap();
    for i in (0..100u32).step_by(2) {
        db.delete(format!("k{i:03}").as_bytes()).unwrap();
    }
    db.flush().unwrap();

    db.compact_range(None, None).unwrap();

    for i in 0..100u32 {
        let got = db.get(format!("k{i:03}").as_bytes()).unwrap();
        if i % 2 == 0 {
            assert_eq!(got, None, "k{i:03} should stay deleted");
        } else {
            assert_eq!(got, Some(b"live".to_vec()), "k{i:03} lost by compaction");
        }
    }
}

// =============================================================================
// Test 3: a live snapshot protects old versions from compaction
// =============================================================================
#[test]
fn snapshot_protects_data_across_compaction() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    db.put(b"a", b"1").unwrap();
    db.flush().unwrap();
    let snap = db.snapshot();

    db.delete(b"a").unwrap();
    db.put(b"b", b"2").unwrap();
    db.flush().unwrap();
    db.compact_range(None, None).unwrap();

    // Latest state: a is gone.
    assert_eq!(db.get(b"a").unwrap(), None);

    // The snapshot still sees the pre-delete value, post-compaction.
    let at_snap = ReadOptions {
        snapshot: Some(snap),
    };
    assert_eq!(db.get_opt(&at_snap, b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get_opt(&at_snap, b"b").unwrap(), None);
}

// =============================================================================
// Test 4: once the snapshot is released, another compaction reclaims the
// buried version for good
// =============================================================================
#[test]
fn released_snapshot_allows_reclamation() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    db.put(b"key", b"old").unwrap();
    db.flush().unwrap();
    let snap = db.snapshot();
    db.delete(b"key").unwrap();
    db.flush().unwrap();

    db.compact_range(None, None).unwrap();
    let at_snap = ReadOptions {
        snapshot: Some(snap.clone()),
    };
    assert_eq!(db.get_opt(&at_snap, b"key").unwrap(), Some(b"old".to_vec()));

    snap.release();
    db.compact_range(None, None).unwrap();
    assert_eq!(db.get(b"key").unwrap(), None);
}

// =============================================================================
// Test 5: range-restricted compaction leaves other key ranges alone
// =============================================================================
#[test]
fn compact_range_respects_bounds() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    for prefix in ["a", "m", "z"] {
        for i in 0..20u32 {
            db.put(format!("{prefix}{i:03}").as_bytes(), b"v").unwrap();
        }
        db.flush().unwrap();
    }
    assert_eq!(level_files(&db, 0), 3);

    db.compact_range(Some(b"a"), Some(b"a999")).unwrap();

    // The a-range moved down; everything is still readable.
    assert!(level_files(&db, 1) > 0);
    for prefix in ["a", "m", "z"] {
        for i in 0..20u32 {
            assert_eq!(
                db.get(format!("{prefix}{i:03}").as_bytes()).unwrap(),
                Some(b"v".to_vec())
            );
        }
    }
}

// =============================================================================
// Test 6: suspend parks background work; resume lets it finish
// =============================================================================
#[test]
fn suspend_and_resume_compactions() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    db.suspend_compactions();
    for i in 0..100u32 {
        db.put(format!("k{i:03}").as_bytes(), b"v").unwrap();
    }
    // Writes proceed while background work is parked.
    assert_eq!(db.get(b"k050").unwrap(), Some(b"v".to_vec()));

    db.resume_compactions();
    db.flush().unwrap();
    assert!(level_files(&db, 0) > 0);
    assert_eq!(db.get(b"k050").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Test 7: automatic compaction keeps level 0 bounded under heavy writes
// =============================================================================
#[test]
fn background_compaction_bounds_level0() {
    let dir = tempdir().unwrap();
    let db = DB::open(
        dir.path(),
        Options {
            write_buffer_size: 16 * 1024,
            ..Options::default()
        },
    )
    .unwrap();

    for i in 0..4000u32 {
        db.put(format!("key{i:05}").as_bytes(), &[3u8; 64]).unwrap();
    }
    db.flush().unwrap();
    db.compact_range(None, None).unwrap();

    assert!(
        level_files(&db, 0) < 8,
        "level 0 should stay bounded, got {}",
        level_files(&db, 0)
    );
    // Everything written is still readable after the churn.
    for i in (0..4000u32).step_by(97) {
        assert_eq!(
            db.get(format!("key{i:05}").as_bytes()).unwrap(),
            Some(vec![3u8; 64])
        );
    }
}

// =============================================================================
// Test 8: overwrites across many flushes collapse to one visible version
// =============================================================================
#[test]
fn compaction_collapses_versions() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();

    for round in 0..5u32 {
        db.put(b"hot", format!("v{round}").as_bytes()).unwrap();
        db.flush().unwrap();
    }
    db.compact_range(None, None).unwrap();
    assert_eq!(db.get(b"hot").unwrap(), Some(b"v4".to_vec()));

    let mut iter = db.iter().unwrap();
    iter.seek_to_first().unwrap();
    assert_eq!(iter.key(), b"hot");
    iter.next().unwrap();
    assert!(!iter.valid());
}

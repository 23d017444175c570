//! Reopen and recovery tests.
//!
//! The tree's only volatile state is the lock table, so dropping the
//! handle (or skipping the orderly close entirely) and reopening the same
//! pool file must yield the same tree.

#![allow(clippy::unwrap_used)]

mod common;

use fastfair::{Error, FastFair, Key, Value, CARDINALITY};

const TEST_POOL_SIZE: u64 = 64 << 20;

#[test]
fn reopen_preserves_contents() {
    common::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
        for key in 1..=1_000 {
            tree.insert(key, key as Value).unwrap();
        }
    }

    let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
    for key in 1..=1_000 {
        assert_eq!(tree.search(key), Some(key as Value), "key {key}");
    }

    let mut buf = Vec::new();
    assert_eq!(tree.range(1, 1_001, &mut buf), 1_000);
    assert_eq!(buf, (1..=1_000).collect::<Vec<Value>>());
}

#[test]
fn reopen_preserves_structure_after_splits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool");

    let n = (CARDINALITY * 40) as Key;
    let height_before;
    {
        let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
        for key in 0..n {
            tree.insert(key, key as Value + 1).unwrap();
        }
        height_before = tree.height();
        assert!(height_before >= 2);
    }

    let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
    assert_eq!(tree.height(), height_before);

    for key in 0..n {
        assert_eq!(tree.search(key), Some(key as Value + 1), "key {key}");
    }
}

#[test]
fn reopen_without_orderly_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
        for key in 0..500 {
            tree.insert(key, key as Value + 1).unwrap();
        }
        // Skip Drop entirely - nothing beyond the already-flushed state
        // may be needed for recovery.
        std::mem::forget(tree);
    }

    let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
    for key in 0..500 {
        assert_eq!(tree.search(key), Some(key as Value + 1), "key {key}");
    }
}

#[test]
fn reopen_empty_tree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let _tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
    }

    let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.search(1), None);

    // And it still accepts writes.
    tree.insert(1, 10).unwrap();
    assert_eq!(tree.search(1), Some(10));
}

#[test]
fn deletes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool");

    {
        let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
        for key in 0..200 {
            tree.insert(key, key as Value + 1).unwrap();
        }
        for key in (0..200).step_by(2) {
            assert!(tree.remove(key).unwrap());
        }
    }

    let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
    for key in 0..200 {
        let expected = if key % 2 == 0 {
            None
        } else {
            Some(key as Value + 1)
        };
        assert_eq!(tree.search(key), expected, "key {key}");
    }
}

#[test]
fn repeated_reopen_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool");

    for round in 0..5u64 {
        let tree = FastFair::open(&path, TEST_POOL_SIZE).unwrap();
        let base = round as Key * 100;
        for key in base..base + 100 {
            tree.insert(key, key as Value + 1).unwrap();
        }

        // Everything from earlier rounds is still there.
        for key in 0..base + 100 {
            assert_eq!(tree.search(key), Some(key as Value + 1), "key {key}");
        }
    }
}

#[test]
fn missing_directory_is_pool_unavailable() {
    let err = FastFair::open("/nonexistent-dir/fastfair.pool", TEST_POOL_SIZE).unwrap_err();
    assert!(matches!(err, Error::PoolUnavailable { .. }), "{err}");
}

#[test]
fn non_pool_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool");
    std::fs::write(&path, vec![0x42u8; 1 << 16]).unwrap();

    let err = FastFair::open(&path, TEST_POOL_SIZE).unwrap_err();
    assert!(matches!(err, Error::InvalidPool { .. }), "{err}");
}

//! Core tree benchmarks: insert and point-lookup throughput.
//!
//! ```bash
//! cargo bench --bench tree
//! ```

use divan::{black_box, Bencher};
use fastfair::{FastFair, Key, Value};

fn main() {
    divan::main();
}

const N: usize = 10_000;
const BENCH_POOL_SIZE: u64 = 256 << 20;

fn make_keys(n: usize) -> Vec<Key> {
    (1..=n as u64)
        .map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15) as Key)
        .collect()
}

#[divan::bench]
fn insert_random(bencher: Bencher) {
    let keys = make_keys(N);

    bencher
        .with_inputs(|| {
            let dir = tempfile::tempdir().unwrap();
            let tree = FastFair::open(dir.path().join("pool"), BENCH_POOL_SIZE).unwrap();
            (dir, tree)
        })
        .bench_local_values(|(dir, tree)| {
            for &key in &keys {
                tree.insert(key, key as Value).unwrap();
            }
            drop(tree);
            drop(dir);
        });
}

#[divan::bench]
fn search_hit(bencher: Bencher) {
    let keys = make_keys(N);
    let dir = tempfile::tempdir().unwrap();
    let tree = FastFair::open(dir.path().join("pool"), BENCH_POOL_SIZE).unwrap();
    for &key in &keys {
        tree.insert(key, key as Value).unwrap();
    }

    bencher.bench_local(|| {
        for &key in &keys {
            black_box(tree.search(key));
        }
    });
}

#[divan::bench]
fn range_scan_full(bencher: Bencher) {
    let keys = make_keys(N);
    let dir = tempfile::tempdir().unwrap();
    let tree = FastFair::open(dir.path().join("pool"), BENCH_POOL_SIZE).unwrap();
    for &key in &keys {
        tree.insert(key, key as Value).unwrap();
    }

    bencher.bench_local(|| {
        let mut buf = Vec::with_capacity(N);
        tree.range(Key::MIN, Key::MAX, &mut buf);
        black_box(buf.len())
    });
}

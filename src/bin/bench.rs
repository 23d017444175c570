//! Benchmark driver for the fastfair tree.
//!
//! Inserts the first half of the key set single-threaded as warm-up, then
//! runs concurrent search and insert phases (or a mixed workload with `-m`)
//! across the remaining keys.
//!
//! ```bash
//! bench -n 1000000 -t 8 -p /mnt/pmem0/fastfair.pool
//! bench -n 1000000 -t 8 -m          # mixed insert/search/delete classes
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use fastfair::{set_write_latency, FastFair, Key, Value};

const DEFAULT_POOL_SIZE: u64 = 8 << 30;

struct Config {
    num_keys: usize,
    threads: usize,
    path: String,
    mixed: bool,
    write_latency_ns: u64,
}

fn usage() -> ! {
    eprintln!("usage: bench -n <keys> [-t <threads>] [-p <pool path>] [-w <latency ns>] [-m]");
    process::exit(2);
}

fn parse_args() -> Config {
    let mut config = Config {
        num_keys: 0,
        threads: 1,
        path: String::from("fastfair.pool"),
        mixed: false,
        write_latency_ns: 0,
    };

    let mut args = env::args().skip(1);
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-n" => config.num_keys = args.next().and_then(|v| v.parse().ok()).unwrap_or_else(|| usage()),
            "-t" => config.threads = args.next().and_then(|v| v.parse().ok()).unwrap_or_else(|| usage()),
            "-p" => config.path = args.next().unwrap_or_else(|| usage()),
            "-w" => {
                config.write_latency_ns =
                    args.next().and_then(|v| v.parse().ok()).unwrap_or_else(|| usage());
            }
            "-m" => config.mixed = true,
            _ => usage(),
        }
    }

    if config.num_keys == 0 || config.threads == 0 {
        usage();
    }
    config
}

/// Pseudo-random 64-bit keys from a multiplicative hash; distinct, never
/// zero for non-zero indices.
fn make_keys(n: usize) -> Vec<Key> {
    (1..=n as u64)
        .map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15) as Key)
        .collect()
}

fn throughput(ops: usize, elapsed_ns: u128) -> f64 {
    ops as f64 / (elapsed_ns as f64 / 1_000_000_000.0) / 1_000_000.0
}

fn main() {
    let config = parse_args();
    set_write_latency(config.write_latency_ns);

    let tree = Arc::new(
        FastFair::open(&config.path, DEFAULT_POOL_SIZE).unwrap_or_else(|e| {
            eprintln!("bench: {e}");
            process::exit(1);
        }),
    );

    let keys = Arc::new(make_keys(config.num_keys));
    let half = config.num_keys / 2;

    // Warm-up: first half, single-threaded.
    let start = Instant::now();
    for &key in &keys[..half] {
        tree.insert(key, key as Value).expect("warm-up insert");
    }
    let elapsed = start.elapsed().as_nanos();
    println!(
        "warm-up: {} inserts in {} usec ({:.2} Mops/s)",
        half,
        elapsed / 1000,
        throughput(half, elapsed)
    );

    let per_thread = half / config.threads;

    if !config.mixed {
        // Concurrent search over the warmed-up half.
        let start = Instant::now();
        let handles: Vec<_> = (0..config.threads)
            .map(|tid| {
                let tree = Arc::clone(&tree);
                let keys = Arc::clone(&keys);
                thread::spawn(move || {
                    let from = per_thread * tid;
                    let to = if tid == config.threads - 1 { half } else { from + per_thread };
                    for &key in &keys[from..to] {
                        std::hint::black_box(tree.search(key));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let elapsed = start.elapsed().as_nanos();
        println!(
            "concurrent search, {} threads: {} usec ({:.2} Mops/s)",
            config.threads,
            elapsed / 1000,
            throughput(half, elapsed)
        );

        // Concurrent insert of the second half.
        let start = Instant::now();
        let handles: Vec<_> = (0..config.threads)
            .map(|tid| {
                let tree = Arc::clone(&tree);
                let keys = Arc::clone(&keys);
                thread::spawn(move || {
                    let from = half + per_thread * tid;
                    let to = if tid == config.threads - 1 {
                        keys.len()
                    } else {
                        from + per_thread
                    };
                    for &key in &keys[from..to] {
                        tree.insert(key, key as Value).expect("insert");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let elapsed = start.elapsed().as_nanos();
        println!(
            "concurrent insert, {} threads: {} usec ({:.2} Mops/s)",
            config.threads,
            elapsed / 1000,
            throughput(keys.len() - half, elapsed)
        );
    } else {
        // Mixed workload: each second-half key runs one of four
        // insert/search/delete interleavings against the warmed-up set.
        let start = Instant::now();
        let handles: Vec<_> = (0..config.threads)
            .map(|tid| {
                let tree = Arc::clone(&tree);
                let keys = Arc::clone(&keys);
                thread::spawn(move || {
                    let from = half + per_thread * tid;
                    let to = if tid == config.threads - 1 {
                        keys.len()
                    } else {
                        from + per_thread
                    };

                    for i in from..to {
                        let key = keys[i];
                        let sidx = i - half;
                        let class = i % 4;
                        let probe = |j: usize| keys[(sidx + j + class * 8) % half];

                        match class {
                            0 => {
                                tree.insert(key, key as Value).expect("insert");
                                for j in 0..4 {
                                    std::hint::black_box(tree.search(probe(j)));
                                }
                                tree.remove(key).expect("remove");
                            }
                            1 => {
                                for j in 0..3 {
                                    std::hint::black_box(tree.search(probe(j)));
                                }
                                tree.insert(key, key as Value).expect("insert");
                                std::hint::black_box(tree.search(probe(3)));
                            }
                            2 => {
                                for j in 0..2 {
                                    std::hint::black_box(tree.search(probe(j)));
                                }
                                tree.insert(key, key as Value).expect("insert");
                                for j in 2..4 {
                                    std::hint::black_box(tree.search(probe(j)));
                                }
                            }
                            _ => {
                                for j in 0..4 {
                                    std::hint::black_box(tree.search(probe(j)));
                                }
                                tree.insert(key, key as Value).expect("insert");
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let elapsed = start.elapsed().as_nanos();
        println!(
            "mixed workload, {} threads: {} usec ({:.2} Mops/s)",
            config.threads,
            elapsed / 1000,
            throughput(keys.len() - half, elapsed)
        );
    }
}

//! Stress tests for `PavtTree` concurrent operations.
//!
//! These tests try to expose races through:
//! - High thread counts (8, 16 threads)
//! - Key patterns that force constant rotation (ascending, interleaved)
//! - Removal racing insertion in the same key gaps
//! - Readers checking for false negatives while writers restructure
//! - Repeated runs for intermittent bugs
//!
//! Run all stress tests:
//! ```bash
//! cargo nextest run --test stress_tests --release
//! ```
//!
//! With the tree's own trace events:
//! ```bash
//! RUST_LOG=pavtree=trace cargo nextest run --features tracing --test stress_tests mixed
//! ```

#![allow(clippy::pedantic)]
#![expect(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use pavtree::{PavtTree, TreeConfig};

type Tree = PavtTree<u64, u64>;

fn new_tree() -> Tree {
    PavtTree::new(0, u64::MAX)
}

/// Structural check plus the AVL height bound.
fn assert_healthy(tree: &Tree, test_name: &str) {
    let shape = tree
        .check_invariants()
        .unwrap_or_else(|e| panic!("{test_name}: {e}"));
    let bound = common::avl_height_bound(shape.len + 1);
    assert!(
        shape.height <= bound,
        "{test_name}: height {} exceeds AVL bound {bound} for {} keys",
        shape.height,
        shape.len
    );
}

/// Verify all keys are findable, panic with details if any missing.
fn verify_all_keys(tree: &Tree, keys: impl Iterator<Item = u64>, test_name: &str) {
    let guard = tree.guard();
    let missing: Vec<u64> = keys
        .filter(|k| tree.get_with_guard(k, &guard).is_none())
        .collect();

    if !missing.is_empty() {
        let sample: Vec<_> = missing.iter().take(20).collect();
        panic!(
            "{}: Missing {} keys (showing first 20): {:?}\n\
             tree.len()={}",
            test_name,
            missing.len(),
            sample,
            tree.len(),
        );
    }
}

// =============================================================================
// INSERT-ONLY
// =============================================================================

/// Each thread inserts its own contiguous block, in ascending order.
#[test]
fn high_thread_8_threads_ascending_blocks() {
    common::init_tracing();

    const NUM_THREADS: u64 = 8;
    const KEYS_PER_THREAD: u64 = 2000;

    let tree = Arc::new(new_tree());
    let verify_failures = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            let verify_failures = Arc::clone(&verify_failures);
            thread::spawn(move || {
                let guard = tree.guard();
                for i in 1..=KEYS_PER_THREAD {
                    let key = t * 100_000 + i;
                    assert!(!tree.insert_with_guard(key, key, &guard));

                    // Immediate verification
                    if tree.get_with_guard(&key, &guard).is_none() {
                        verify_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let fail_count = verify_failures.load(Ordering::Relaxed);
    assert_eq!(fail_count, 0, "{fail_count} immediate verification failures");

    let keys = (0..NUM_THREADS).flat_map(|t| (1..=KEYS_PER_THREAD).map(move |i| t * 100_000 + i));
    verify_all_keys(&tree, keys, "high_thread_8_threads_ascending_blocks");
    assert_eq!(tree.len() as u64, NUM_THREADS * KEYS_PER_THREAD);
    assert_healthy(&tree, "high_thread_8_threads_ascending_blocks");
}

/// Threads interleave keys (t, t + N, t + 2N, ...), so every insert lands
/// next to another thread's most recent insert.
#[test]
fn high_thread_16_threads_interleaved() {
    common::init_tracing();

    const NUM_THREADS: u64 = 16;
    const KEYS_PER_THREAD: u64 = 1000;

    let tree = Arc::new(new_tree());

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..KEYS_PER_THREAD {
                    let key = 1 + i * NUM_THREADS + t;
                    tree.insert(key, key * 2);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let total = NUM_THREADS * KEYS_PER_THREAD;
    verify_all_keys(&tree, 1..=total, "high_thread_16_threads_interleaved");
    assert_eq!(tree.len() as u64, total);
    assert_healthy(&tree, "high_thread_16_threads_interleaved");

    let keys: Vec<u64> = tree.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, (1..=total).collect::<Vec<_>>());
}

/// All threads insert the same keys; exactly one insert per key must report
/// a fresh key.
#[test]
fn duplicate_inserts_count_once() {
    common::init_tracing();

    const NUM_THREADS: usize = 8;
    const KEYS: u64 = 2000;

    let tree = Arc::new(new_tree());
    let fresh = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            let fresh = Arc::clone(&fresh);
            thread::spawn(move || {
                for key in 1..=KEYS {
                    if !tree.insert(key, t as u64) {
                        fresh.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(fresh.load(Ordering::Relaxed) as u64, KEYS);
    assert_eq!(tree.len() as u64, KEYS);
    for key in 1..=KEYS {
        assert!(*tree.get(&key).unwrap() < NUM_THREADS as u64);
    }
    assert_healthy(&tree, "duplicate_inserts_count_once");
}

// =============================================================================
// MIXED INSERT / REMOVE
// =============================================================================

/// Each thread owns a disjoint key set and runs a random insert/remove/get
/// mix over it against a private oracle. Ownership makes the final state
/// exact even though the key sets interleave in the tree.
#[test]
fn mixed_owned_keys_match_oracle() {
    common::init_tracing();

    const NUM_THREADS: u64 = 8;
    const OPS_PER_THREAD: usize = 20_000;
    const KEYS_PER_THREAD: u64 = 256;

    let tree = Arc::new(new_tree());

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut oracle = BTreeMap::new();
                let mut rng = 0x9E37_79B9_7F4A_7C15 ^ (t + 1);
                let guard = tree.guard();
                for _ in 0..OPS_PER_THREAD {
                    let r = common::xorshift(&mut rng);
                    // Keys of thread t are t + 1, t + 1 + N, ...: neighbours
                    // in the tree belong to other threads.
                    let key = 1 + (r % KEYS_PER_THREAD) * NUM_THREADS + t;
                    match (r >> 32) % 3 {
                        0 => {
                            let existed = tree.insert_with_guard(key, r, &guard);
                            assert_eq!(existed, oracle.insert(key, r).is_some());
                        }
                        1 => {
                            let removed = tree.remove_with_guard(&key, &guard).map(|v| *v);
                            assert_eq!(removed, oracle.remove(&key));
                        }
                        _ => {
                            let got = tree.get_with_guard(&key, &guard).map(|v| *v);
                            assert_eq!(got, oracle.get(&key).copied());
                        }
                    }
                }
                oracle
            })
        })
        .collect();

    let mut expected = BTreeMap::new();
    for h in handles {
        expected.extend(h.join().unwrap());
    }

    common::assert_contents(&tree, &expected);
    assert_healthy(&tree, "mixed_owned_keys_match_oracle");
}

/// Every thread hammers the same small key set. Nothing is exact except the
/// final structure: it must be a valid AVL tree whose `len` matches.
#[test]
fn shared_keys_high_contention() {
    common::init_tracing();

    const NUM_THREADS: u64 = 8;
    const OPS_PER_THREAD: usize = 20_000;
    const KEYS: u64 = 64;

    let tree = Arc::new(new_tree());

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut rng = 0xDEAD_BEEF_u64 + t;
                for _ in 0..OPS_PER_THREAD {
                    let r = common::xorshift(&mut rng);
                    let key = 1 + r % KEYS;
                    if r & (1 << 40) == 0 {
                        tree.insert(key, t);
                    } else {
                        tree.remove(&key);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_healthy(&tree, "shared_keys_high_contention");
    let present = (1..=KEYS).filter(|k| tree.contains(k)).count();
    assert_eq!(present, tree.len());

    let stats = tree.stats();
    tracing::info!(?stats, "shared_keys_high_contention finished");
}

/// Repeats a short mixed run to catch intermittent failures.
#[test]
fn repeated_mixed_runs() {
    common::init_tracing();

    for run in 0..20u64 {
        let tree = Arc::new(new_tree());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    let mut rng = (run + 1) * 7919 + t;
                    for _ in 0..2000 {
                        let r = common::xorshift(&mut rng);
                        let key = 1 + r % 128;
                        match r % 4 {
                            0 | 1 => {
                                tree.insert(key, r);
                            }
                            2 => {
                                tree.remove(&key);
                            }
                            _ => {
                                let _ = tree.get(&key);
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_healthy(&tree, &format!("repeated_mixed_runs[{run}]"));
    }
}

// =============================================================================
// READERS VS WRITERS
// =============================================================================

/// Even keys are inserted up front and never touched again. Writers churn
/// the odd keys between them, forcing rotations and relocations all over
/// the tree. Readers must find every even key on every pass and never find
/// an even key missing.
#[test]
fn readers_never_miss_stable_keys() {
    common::init_tracing();

    const STABLE: u64 = 2000;
    const WRITERS: u64 = 4;
    const READERS: usize = 4;

    let tree = Arc::new(new_tree());
    for k in 1..=STABLE {
        tree.insert(k * 2, k);
    }
    let done = Arc::new(AtomicBool::new(false));
    let false_negatives = Arc::new(AtomicUsize::new(0));

    let writers: Vec<_> = (0..WRITERS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut rng = 0x1234_5678 + t;
                for _ in 0..30_000 {
                    let r = common::xorshift(&mut rng);
                    let key = (r % STABLE) * 2 + 1;
                    if r & 1 == 0 {
                        tree.insert(key, r);
                    } else {
                        tree.remove(&key);
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let tree = Arc::clone(&tree);
            let done = Arc::clone(&done);
            let false_negatives = Arc::clone(&false_negatives);
            thread::spawn(move || {
                let mut passes = 0usize;
                while !done.load(Ordering::Relaxed) || passes == 0 {
                    let guard = tree.guard();
                    for k in 1..=STABLE {
                        match tree.get_with_guard(&(k * 2), &guard) {
                            Some(v) => assert_eq!(*v, k),
                            None => {
                                false_negatives.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    passes += 1;
                }
                passes
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    let passes: usize = readers.into_iter().map(|r| r.join().unwrap()).sum();

    assert_eq!(
        false_negatives.load(Ordering::Relaxed),
        0,
        "stable keys reported missing over {passes} reader passes"
    );
    verify_all_keys(&tree, (1..=STABLE).map(|k| k * 2), "readers_never_miss_stable_keys");
    assert_healthy(&tree, "readers_never_miss_stable_keys");
}

/// One writer overwrites a key with increasing values while readers watch.
/// Each reader must see a non-decreasing sequence and never a missing key.
#[test]
fn overwrite_visibility_is_monotonic() {
    common::init_tracing();

    const WRITES: u64 = 50_000;

    let tree = Arc::new(new_tree());
    tree.insert(42, 0);
    for k in (1..200).filter(|&k| k != 42) {
        tree.insert(k, k);
    }
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let tree = Arc::clone(&tree);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = 0;
                while !done.load(Ordering::Relaxed) {
                    let v = *tree.get(&42).unwrap();
                    assert!(v >= last, "value went backwards: {last} -> {v}");
                    last = v;
                }
            })
        })
        .collect();

    // Churn neighbouring keys so the node holding 42 keeps moving.
    let churn = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for round in 0..200 {
                for k in (30..60).filter(|&k| k != 42) {
                    if round % 2 == 0 {
                        tree.remove(&k);
                    } else {
                        tree.insert(k, k);
                    }
                }
            }
        })
    };

    for v in 1..=WRITES {
        assert!(tree.insert(42, v));
    }
    churn.join().unwrap();
    done.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(*tree.get(&42).unwrap(), WRITES);
    assert_healthy(&tree, "overwrite_visibility_is_monotonic");
}

/// Range scans run while writers churn odd keys. Every scan must be
/// strictly ascending and contain every stable even key in its bounds.
#[test]
fn range_scans_during_writes() {
    common::init_tracing();

    const STABLE: u64 = 1000;

    let tree = Arc::new(new_tree());
    for k in 1..=STABLE {
        tree.insert(k * 2, k);
    }
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..3u64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut rng = 0xABCD + t;
                for _ in 0..20_000 {
                    let r = common::xorshift(&mut rng);
                    let key = (r % STABLE) * 2 + 1;
                    if r & 2 == 0 {
                        tree.insert(key, r);
                    } else {
                        tree.remove(&key);
                    }
                }
            })
        })
        .collect();

    let scanners: Vec<_> = (0..2)
        .map(|s| {
            let tree = Arc::clone(&tree);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let (lo, hi) = (200, 1400);
                let mut scans = 0usize;
                while !done.load(Ordering::Relaxed) || scans == 0 {
                    let keys: Vec<u64> = if s == 0 {
                        tree.range(lo..=hi).map(|(k, _)| k).collect()
                    } else {
                        let mut keys: Vec<u64> = tree.range_rev(lo..=hi).map(|(k, _)| k).collect();
                        assert!(keys.windows(2).all(|w| w[0] > w[1]), "descending scan out of order");
                        keys.reverse();
                        keys
                    };
                    assert!(keys.windows(2).all(|w| w[0] < w[1]), "scan out of order");
                    assert!(keys.iter().all(|k| (lo..=hi).contains(k)));
                    // Scans may miss keys moved by a concurrent rotation, so
                    // only the order and bounds are checked while writers run.
                    scans += 1;
                }
                scans
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    for s in scanners {
        assert!(s.join().unwrap() > 0);
    }

    // Quiescent: a scan is now exact.
    let evens: Vec<u64> = tree
        .range(200..=1400)
        .map(|(k, _)| k)
        .filter(|k| k % 2 == 0)
        .collect();
    assert_eq!(evens, (100..=700).map(|k| k * 2).collect::<Vec<_>>());
    assert_healthy(&tree, "range_scans_during_writes");
}

// =============================================================================
// BOUNDED RETRIES
// =============================================================================

/// With a tiny retry budget under contention, `try_*` calls may fail, but a
/// failed call must leave no trace and successful ones must be exact.
#[test]
fn bounded_retries_leave_tree_consistent() {
    common::init_tracing();

    const NUM_THREADS: u64 = 8;

    let tree: Arc<Tree> = Arc::new(PavtTree::with_config(
        0,
        u64::MAX,
        pavtree::NaturalOrder,
        TreeConfig::new().with_max_retries(2).with_backoff_spins(4),
    ));
    let gave_up = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            let gave_up = Arc::clone(&gave_up);
            thread::spawn(move || {
                let mut oracle = BTreeMap::new();
                let mut rng = 0x5EED + t;
                for _ in 0..10_000 {
                    let r = common::xorshift(&mut rng);
                    let key = 1 + (r % 64) * NUM_THREADS + t;
                    let outcome = if r & 1 == 0 {
                        tree.try_insert(key, r).map(|existed| {
                            assert_eq!(existed, oracle.insert(key, r).is_some());
                        })
                    } else {
                        tree.try_remove(&key).map(|removed| {
                            assert_eq!(removed.map(|v| *v), oracle.remove(&key));
                        })
                    };
                    if outcome.is_err() {
                        gave_up.fetch_add(1, Ordering::Relaxed);
                    }
                }
                oracle
            })
        })
        .collect();

    let mut expected = BTreeMap::new();
    for h in handles {
        expected.extend(h.join().unwrap());
    }

    tracing::info!(
        gave_up = gave_up.load(Ordering::Relaxed),
        "bounded_retries_leave_tree_consistent finished"
    );
    common::assert_contents(&tree, &expected);
}

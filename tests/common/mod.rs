//! Shared helpers for integration tests: tracing setup and tree checks.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ... run with `--features tracing` to see the tree's own events
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Filter directives (e.g., `pavtree=debug,pavtree::tree::remove=trace`)
//! - `PAVTREE_LOG_DIR`: Log directory (default: `logs/`)
//! - `PAVTREE_LOG_CONSOLE`: Set to "0" to disable console output
//!
//! # Log Files
//!
//! Logs are written to `logs/pavtree.jsonl` as newline-delimited JSON (NDJSON).
//! Use `jq` for pretty-printing and filtering:
//!
//! ```bash
//! # Pretty-print all logs
//! cat logs/pavtree.jsonl | jq .
//!
//! # Convert to JSON array
//! cat logs/pavtree.jsonl | jq -s .
//!
//! # Events that carry a retry count
//! cat logs/pavtree.jsonl | jq 'select(.fields.attempts != null)'
//!
//! # Exhausted retry budgets
//! cat logs/pavtree.jsonl | jq 'select(.level == "WARN")'
//! ```

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use pavtree::PavtTree;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Install the console and NDJSON file subscribers once per test binary.
///
/// The tree only emits events when built with `--features tracing`; without
/// it the subscriber is installed but stays silent.
pub fn init_tracing() {
    INIT.call_once(install_subscriber);
}

/// `RUST_LOG`, falling back to info.
fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn log_path() -> PathBuf {
    let dir = env::var_os("PAVTREE_LOG_DIR").map_or_else(|| PathBuf::from("logs"), PathBuf::from);
    dir.join("pavtree.jsonl")
}

#[expect(clippy::expect_used)]
fn install_subscriber() {
    let path = log_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).expect("create log directory");
    }
    // Append: nextest runs each test in its own process.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .expect("open log file");

    let console = (!env::var("PAVTREE_LOG_CONSOLE").is_ok_and(|v| v == "0")).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .compact()
            .with_filter(filter())
    });

    let json = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .with_filter(filter());

    let _ = Registry::default().with(console).with(json).try_init();
}

/// Assert the tree holds exactly `expected`, in order, and passes the
/// structural checks.
pub fn assert_contents(tree: &PavtTree<u64, u64>, expected: &BTreeMap<u64, u64>) {
    let shape = tree
        .check_invariants()
        .unwrap_or_else(|e| panic!("invariant violated: {e}"));
    assert_eq!(shape.len, expected.len(), "len mismatch");

    let found: Vec<(u64, u64)> = tree.iter().map(|(k, v)| (k, *v)).collect();
    let wanted: Vec<(u64, u64)> = expected.iter().map(|(&k, &v)| (k, v)).collect();
    if found != wanted {
        let missing: Vec<u64> = expected
            .keys()
            .filter(|k| tree.get(k).is_none())
            .copied()
            .take(20)
            .collect();
        panic!(
            "contents differ: {} found vs {} expected; first missing keys: {missing:?}",
            found.len(),
            wanted.len()
        );
    }
}

/// Height bound of an AVL tree with `nodes` nodes: 1.45 * log2(nodes + 2).
pub fn avl_height_bound(nodes: usize) -> u32 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bound = (1.45 * ((nodes + 2) as f64).log2()).floor() as u32;
    bound.max(1)
}

/// Simple xorshift PRNG for deterministic random access patterns.
pub fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

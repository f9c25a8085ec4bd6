//! `PavtTree` - a concurrent AVL tree with snapshot-validated lock-free reads.
//!
//! This module holds the tree container, its error type and the teardown.
//! The operations live in submodules:
//!
//! - [`traverse`]: lock-free descent and snapshot validation
//! - [`optimistic`]: `get` / `contains`
//! - [`locked`]: `insert`
//! - [`remove`]: `remove`
//! - [`rebalance`]: AVL height maintenance and rotations
//! - [`range`]: ordered iteration
//! - [`verify`]: quiescent invariant checker

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use seize::{Collector, LocalGuard};

use crate::compare::{Comparator, NaturalOrder};
use crate::config::TreeConfig;
use crate::node::{Node, Side};
use crate::ordering::RELAXED;
use crate::tracing_helpers::debug_log;

mod locked;
mod lockset;
mod optimistic;
mod range;
mod rebalance;
mod remove;
mod stats;
mod traverse;
mod verify;

#[cfg(test)]
pub mod test_hooks;




pub use range::Range;
pub use stats::TreeStats;
pub use verify::{InvariantViolation, TreeShape};

// ============================================================================
//  TreeError
// ============================================================================

/// The operation a [`TreeError`] was raised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Lookup.
    Get,
    /// Insert or overwrite.
    Insert,
    /// Removal.
    Remove,
}

impl StdFmt::Display for Operation {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Insert => write!(f, "insert"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// Errors reported by the bounded `try_*` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The key does not compare strictly between the tree's sentinel keys.
    KeyOutOfBounds,

    /// The configured retry budget ran out before the operation could
    /// validate. The tree is unchanged by the failed attempt.
    RetryLimitExceeded {
        /// Operation that gave up.
        operation: Operation,
        /// Attempts made, including the first.
        attempts: u32,
    },
}

impl StdFmt::Display for TreeError {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::KeyOutOfBounds => {
                write!(f, "key is not strictly between the tree's sentinel keys")
            }

            Self::RetryLimitExceeded {
                operation,
                attempts,
            } => write!(
                f,
                "{operation} gave up after {attempts} attempts under contention"
            ),
        }
    }
}

impl std::error::Error for TreeError {}

// ============================================================================
//  PavtTree
// ============================================================================

/// A concurrent ordered map.
///
/// Lookups never lock: they descend without synchronization and validate
/// the node they stop at against its snapshot links, retrying if a
/// concurrent writer could have misled them. Writers lock only the nodes
/// they rewrite.
///
/// Keys must compare strictly between the two sentinel keys given at
/// construction. Values are stored as `Arc<V>`; lookups return a clone of
/// the `Arc`.
///
/// # Type Parameters
///
/// - `K` - key type, ordered by `C`
/// - `V` - value type
/// - `C` - the [`Comparator`]; [`NaturalOrder`] by default
///
/// # Example
///
/// ```rust
/// use pavtree::PavtTree;
///
/// let tree: PavtTree<i64, &str> = PavtTree::new(i64::MIN, i64::MAX);
/// assert!(!tree.insert(5, "a"));
/// assert!(!tree.insert(3, "b"));
/// assert!(tree.insert(5, "c"));
/// assert_eq!(tree.get(&3).as_deref(), Some(&"b"));
/// assert_eq!(tree.get(&5).as_deref(), Some(&"c"));
/// assert!(tree.get(&9).is_none());
/// ```
pub struct PavtTree<K, V, C = NaturalOrder> {
    /// Memory reclamation collector for unlinked nodes and replaced values.
    collector: Collector,

    /// Minimum sentinel. Fixed root of the tree; never rotated.
    root: *mut Node<K, V>,

    /// Maximum sentinel. Always somewhere in the root's right subtree.
    max_sentinel: *mut Node<K, V>,

    /// Number of user keys.
    count: AtomicUsize,

    comparator: C,

    config: TreeConfig,

    counters: stats::Counters,

    #[cfg(test)]
    hooks: test_hooks::Hooks,

    _marker: PhantomData<(K, Arc<V>)>,
}

// SAFETY: nodes are only reachable through the tree. Keys and values are
// read by many threads (Sync) and dropped by whichever thread reclaims them
// (Send); the comparator is shared by reference across threads.
unsafe impl<K: Send + Sync, V: Send + Sync, C: Send + Sync> Send for PavtTree<K, V, C> {}
unsafe impl<K: Send + Sync, V: Send + Sync, C: Send + Sync> Sync for PavtTree<K, V, C> {}

impl<K: Ord, V> PavtTree<K, V, NaturalOrder> {
    /// Create an empty tree ordered by `Ord`, bounded by `min` and `max`.
    ///
    /// Every key later stored must satisfy `min < key < max`.
    ///
    /// # Panics
    /// Panics if `min >= max`.
    #[must_use]
    pub fn new(min: K, max: K) -> Self {
        Self::with_comparator(min, max, NaturalOrder)
    }
}

impl<K, V, C: Comparator<K>> PavtTree<K, V, C> {
    /// Create an empty tree with a custom key order.
    ///
    /// # Panics
    /// Panics if `min` does not compare less than `max`.
    #[must_use]
    pub fn with_comparator(min: K, max: K, comparator: C) -> Self {
        Self::with_config(min, max, comparator, TreeConfig::default())
    }

    /// Create an empty tree with a custom key order and configuration.
    ///
    /// # Panics
    /// Panics if `min` does not compare less than `max`.
    #[must_use]
    pub fn with_config(min: K, max: K, comparator: C, config: TreeConfig) -> Self {
        assert!(
            comparator.compare(&min, &max).is_lt(),
            "minimum sentinel key must compare less than the maximum sentinel key"
        );

        let root = Node::alloc(min, None, std::ptr::null_mut());
        let max_sentinel = Node::alloc(max, None, root);

        // SAFETY: both nodes were just allocated and are not shared yet.
        unsafe {
            let (lo, hi) = (&*root, &*max_sentinel);
            lo.set_child(Side::Right, max_sentinel);
            lo.set_height(2);

            // Real neighbours.
            lo.set_snapshot(Side::Right, max_sentinel);
            hi.set_snapshot(Side::Left, root);

            // Outward sides point at the opposite sentinel. Keys are
            // bounds-checked, so these are never consulted.
            lo.set_snapshot(Side::Left, max_sentinel);
            hi.set_snapshot(Side::Right, root);
        }

        debug_log!(?config, "pavtree: created tree");

        Self {
            collector: Collector::new(),
            root,
            max_sentinel,
            count: AtomicUsize::new(0),
            comparator,
            config,
            counters: stats::Counters::default(),
            #[cfg(test)]
            hooks: test_hooks::Hooks::default(),
            _marker: PhantomData,
        }
    }
}

impl<K, V, C> PavtTree<K, V, C> {
    /// Enter the reclamation collector.
    ///
    /// Pass the guard to the `_with_guard` methods to amortise entry over
    /// several operations. The guard is `!Send`.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Number of keys in the tree.
    ///
    /// Exact when no writer is in flight; otherwise a value the count held
    /// at some recent instant.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(RELAXED)
    }

    /// Whether the tree holds no keys.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configuration the tree was built with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Snapshot of the contention counters.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        self.counters.snapshot()
    }

    /// Reset the contention counters to zero.
    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Height of the user-visible tree (the root sentinel's right subtree,
    /// which includes the maximum sentinel).
    #[must_use]
    pub fn height(&self) -> u32 {
        let guard = self.guard();
        self.root(&guard).child_heights().1
    }

    /// Hook slots for deterministic interleaving tests.
    #[cfg(test)]
    pub(crate) const fn hooks(&self) -> &test_hooks::Hooks {
        &self.hooks
    }

    #[inline]
    pub(crate) fn root<'g>(&self, guard: &'g LocalGuard<'_>) -> &'g Node<K, V> {
        // SAFETY: the root sentinel lives as long as the tree.
        unsafe { Node::deref(self.root, guard) }
    }

    #[inline]
    pub(crate) fn is_sentinel(&self, node: &Node<K, V>) -> bool {
        std::ptr::eq(node.as_ptr(), self.root) || std::ptr::eq(node.as_ptr(), self.max_sentinel)
    }

    pub(crate) const fn counters(&self) -> &stats::Counters {
        &self.counters
    }

    pub(crate) fn increment_count(&self) {
        self.count.fetch_add(1, RELAXED);
    }

    pub(crate) fn decrement_count(&self) {
        self.count.fetch_sub(1, RELAXED);
    }
}

impl<K, V, C: Comparator<K>> PavtTree<K, V, C> {
    #[inline]
    pub(crate) fn compare(&self, a: &K, b: &K) -> std::cmp::Ordering {
        self.comparator.compare(a, b)
    }

    /// Whether `key` lies strictly between the sentinel keys.
    #[inline]
    pub(crate) fn in_bounds(&self, key: &K) -> bool {
        // SAFETY: sentinels live as long as the tree; keys are immutable.
        let (lo, hi) = unsafe { ((*self.root).key(), (*self.max_sentinel).key()) };
        self.compare(lo, key).is_lt() && self.compare(key, hi).is_lt()
    }
}

/// Whether a retry budget allows another attempt after `attempts` tries.
#[inline]
pub(crate) const fn budget_allows(budget: Option<u32>, attempts: u32) -> bool {
    match budget {
        Some(max) => attempts < max,
        None => true,
    }
}

impl<K, V, C> StdFmt::Debug for PavtTree<K, V, C> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("PavtTree")
            .field("len", &self.len())
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<K, V, C> Drop for PavtTree<K, V, C> {
    fn drop(&mut self) {
        // `&mut self`: no reader or writer can be active. Free everything
        // still linked; retired nodes belong to the collector, which is
        // dropped after this and reclaims them.
        let mut stack: Vec<*mut Node<K, V>> = vec![self.root];
        while let Some(ptr) = stack.pop() {
            // SAFETY: every linked node is owned by exactly one parent slot
            // and visited once.
            let node: Box<Node<K, V>> = unsafe { Box::from_raw(ptr) };
            for child in [node.left(), node.right()] {
                if !child.is_null() {
                    stack.push(child);
                }
            }
            let value = node.load_value();
            if !value.is_null() {
                // SAFETY: the tree's strong reference to a live value.
                drop(unsafe { Arc::from_raw(value) });
            }
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================

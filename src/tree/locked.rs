//! Locked insert for [`PavtTree`].
//!
//! # Write Protocol
//!
//! ```text
//! 1. guard = tree.collector.enter()
//! 2. (n, dir) = search_for_key(k)              // lock-free
//! 3. dir == Equal:
//!      n.lock(); marked -> retry; swap value; retire old value
//! 4. otherwise, with side = dir:
//!      n.lock()                                // the only lock taken
//!      validate: !n.marked, n.child(side) empty, k inside n's gap on side
//!      failed -> unlock, retry from 2
//!      bound = n.snapshot(side)
//!      x = new node (parent n, height 1)
//!      x.snapshot(side) = bound; x.snapshot(opposite) = n
//!      bound.snapshot(opposite) = x; n.snapshot(side) = x
//!      n.child(side) = x                       // linearization point
//!      unlock; rebalance from n
//! ```
//!
//! Holding `n` with `n.child(side)` empty makes `n` the owner of the gap
//! between `n` and `bound`, so `bound`'s snapshot may be rewritten without
//! `bound`'s lock. The snapshot stores precede the link: a reader that
//! still sees the old snapshot is ordered before the key became visible.

use std::sync::Arc;

use seize::LocalGuard;

use crate::compare::Comparator;
use crate::node::{Node, Side};
use crate::tracing_helpers::{trace_log, warn_log};

use super::{Operation, PavtTree, TreeError, budget_allows};

impl<K, V, C: Comparator<K>> PavtTree<K, V, C> {
    /// Insert `key` with `value`, overwriting any existing value.
    ///
    /// Returns `true` if the key was already present.
    ///
    /// # Panics
    /// Panics if `key` does not compare strictly between the sentinel keys.
    pub fn insert(&self, key: K, value: V) -> bool {
        let guard = self.guard();
        self.insert_with_guard(key, value, &guard)
    }

    /// Insert under a caller-held guard. See [`insert`](Self::insert).
    ///
    /// # Panics
    /// Panics if `key` does not compare strictly between the sentinel keys.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn insert_with_guard(&self, key: K, value: V, guard: &LocalGuard<'_>) -> bool {
        assert!(
            self.in_bounds(&key),
            "insert: key outside the tree's sentinel bounds"
        );
        match self.insert_attempts(key, Arc::new(value), None, guard) {
            Ok(existed) => existed,
            Err(attempts) => unreachable!("unbounded insert stopped after {attempts} attempts"),
        }
    }

    /// Insert, giving up after the configured retry budget.
    ///
    /// # Errors
    /// - [`TreeError::KeyOutOfBounds`] if `key` is not strictly between the
    ///   sentinel keys.
    /// - [`TreeError::RetryLimitExceeded`] if the budget ran out; the tree
    ///   is unchanged.
    pub fn try_insert(&self, key: K, value: V) -> Result<bool, TreeError> {
        if !self.in_bounds(&key) {
            return Err(TreeError::KeyOutOfBounds);
        }
        let guard = self.guard();
        self.insert_attempts(key, Arc::new(value), self.config.max_retries(), &guard)
            .map_err(|attempts| {
                warn_log!(attempts, "insert: retry budget exhausted");
                TreeError::RetryLimitExceeded {
                    operation: Operation::Insert,
                    attempts,
                }
            })
    }

    /// The insert loop. `Err(attempts)` only when `budget` runs out.
    fn insert_attempts(
        &self,
        key: K,
        value: Arc<V>,
        budget: Option<u32>,
        guard: &LocalGuard<'_>,
    ) -> Result<bool, u32> {
        let mut pending = (key, value);
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let (node, dir) = self.search_for_key(&pending.0, guard);

            match Side::of(dir) {
                None => match self.overwrite(node, pending.1, guard) {
                    Ok(()) => return Ok(true),
                    Err(value) => {
                        trace_log!(attempts, "insert: matched a removed node, retrying");
                        pending.1 = value;
                    }
                },
                Some(side) => match self.attach(node, side, pending, guard) {
                    Ok(()) => {
                        self.increment_count();
                        self.rebalance_from(node, guard);
                        return Ok(false);
                    }
                    Err(back) => {
                        trace_log!(attempts, "insert: attach validation failed, retrying");
                        pending = back;
                    }
                },
            }

            self.counters().insert_retry();
            if !budget_allows(budget, attempts) {
                return Err(attempts);
            }
            std::hint::spin_loop();
        }
    }

    /// Replace the value of a matched node. Hands the value back if the
    /// node was removed before its lock was taken.
    fn overwrite(&self, node: &Node<K, V>, value: Arc<V>, guard: &LocalGuard<'_>) -> Result<(), Arc<V>> {
        let lock = node.lock().lock();
        if node.is_marked() {
            drop(lock);
            return Err(value);
        }
        let old = node.swap_value(Arc::into_raw(value).cast_mut());
        drop(lock);

        // SAFETY: `old` was just unpublished; readers that loaded it are
        // covered by their guards.
        unsafe { Node::<K, V>::retire_value(old, guard) };
        Ok(())
    }

    /// Lock `parent` and link a new node holding `pending` into its empty
    /// `side` slot. Hands `pending` back if validation under the lock fails.
    fn attach(
        &self,
        parent: &Node<K, V>,
        side: Side,
        pending: (K, Arc<V>),
        guard: &LocalGuard<'_>,
    ) -> Result<(), (K, Arc<V>)> {
        let dir = match side {
            Side::Left => std::cmp::Ordering::Less,
            Side::Right => std::cmp::Ordering::Greater,
        };

        let lock = parent.lock().lock();
        if parent.is_marked()
            || !parent.child(side).is_null()
            || self.snapshot_stale(parent, &pending.0, dir, guard)
        {
            drop(lock);
            return Err(pending);
        }

        #[cfg(test)]
        self.hooks.call_before_link();

        let bound_ptr = parent.snapshot(side);
        // SAFETY: snapshot links name live nodes; the gap is ours while
        // `parent` is locked, so `bound` cannot be unlinked.
        let bound = unsafe { Node::deref(bound_ptr, guard) };

        let (key, value) = pending;
        let child_ptr = Node::alloc(key, Some(value), parent.as_ptr());
        // SAFETY: freshly allocated and not yet published.
        let child = unsafe { &*child_ptr };

        child.set_snapshot(side, bound_ptr);
        child.set_snapshot(side.opposite(), parent.as_ptr());
        bound.set_snapshot(side.opposite(), child_ptr);
        parent.set_snapshot(side, child_ptr);

        parent.set_child(side, child_ptr);
        drop(lock);
        Ok(())
    }
}

//! Removal for [`PavtTree`].
//!
//! # Protocol
//!
//! ```text
//! 1. (n, dir) = search_for_key(k); no valid match -> None; marked -> retry
//! 2. lock n (blocking), try_lock g = n.parent; both unmarked, g holds n
//! 3. a = n.pred, c = n.succ
//!      n.left  non-empty -> a owns gap (a, n): try_lock a, a.right empty
//!      n.right non-empty -> c owns gap (n, c): try_lock c, c.left empty
//!      two children      -> try_lock cp = c.parent
//! 4. mark n                                    // linearization point
//!    take value; a.succ = c; c.pred = a
//! 5. <= 1 child: splice it into g
//!    2 children: c leaves cp and takes n's slot, children and height
//! 6. unlock; retire n and the value
//! 7. rebalance from g (splice) or cp; then from a relocated c
//! ```
//!
//! Any failed `try_lock` drops every lock and backs off. Any failed
//! validation drops every lock and retries from the descent.
//!
//! Before the splice, the new gap `(a, c)` already has a locked owner: `a`
//! when `a.right` is empty, otherwise `c`. Concurrent inserts into that gap
//! therefore queue behind this removal and revalidate against the rewired
//! snapshots.

use std::sync::Arc;

use seize::LocalGuard;

use crate::compare::Comparator;
use crate::config::Backoff;
use crate::node::{Node, Side};
use crate::tracing_helpers::{trace_log, warn_log};

use super::lockset::LockSet;
use super::{Operation, PavtTree, TreeError, budget_allows};

/// Outcome of one locked unlink attempt.
enum Unlink<K, V> {
    Done {
        value: Option<Arc<V>>,
        rebalance_at: *mut Node<K, V>,
        /// The successor moved up from below `rebalance_at`; null otherwise.
        relocated: *mut Node<K, V>,
    },
    /// A `try_lock` failed.
    Contended,
    /// The neighbourhood changed or the node is already gone.
    Stale,
}

impl<K, V, C: Comparator<K>> PavtTree<K, V, C> {
    /// Remove `key`, returning its value if it was present.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let guard = self.guard();
        self.remove_with_guard(key, &guard)
    }

    /// Remove under a caller-held guard. See [`remove`](Self::remove).
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn remove_with_guard(&self, key: &K, guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        match self.remove_attempts(key, None, guard) {
            Ok(value) => value,
            Err(attempts) => unreachable!("unbounded remove stopped after {attempts} attempts"),
        }
    }

    /// Remove, giving up after the configured retry budget.
    ///
    /// # Errors
    /// [`TreeError::RetryLimitExceeded`] if the budget ran out; the key is
    /// then still present. Keys outside the sentinel bounds are simply
    /// absent.
    pub fn try_remove(&self, key: &K) -> Result<Option<Arc<V>>, TreeError> {
        let guard = self.guard();
        self.remove_attempts(key, self.config.max_retries(), &guard)
            .map_err(|attempts| {
                warn_log!(attempts, "remove: retry budget exhausted");
                TreeError::RetryLimitExceeded {
                    operation: Operation::Remove,
                    attempts,
                }
            })
    }

    fn remove_attempts(
        &self,
        key: &K,
        budget: Option<u32>,
        guard: &LocalGuard<'_>,
    ) -> Result<Option<Arc<V>>, u32> {
        if !self.in_bounds(key) {
            return Ok(None);
        }

        let mut backoff = Backoff::new(self.config.backoff_spins());
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let (node, dir) = self.search_for_key(key, guard);

            if dir.is_ne() {
                if !self.traversal_invalid(node, key, dir, guard) {
                    return Ok(None);
                }
                trace_log!(attempts, "remove: snapshot invalidated, retrying");
            } else if node.is_marked() {
                trace_log!(attempts, "remove: matched a node being removed, retrying");
            } else {
                match self.unlink(node, guard) {
                    Unlink::Done {
                        value,
                        rebalance_at,
                        relocated,
                    } => {
                        self.decrement_count();
                        // SAFETY: unlinked above and unreachable for new
                        // descents; current readers are covered by guards.
                        unsafe { Node::retire(node.as_ptr(), guard) };
                        // SAFETY: both were linked when the locks were
                        // released and are protected by `guard`.
                        self.rebalance_from(unsafe { Node::deref(rebalance_at, guard) }, guard);
                        // The successor took the removed node's height, which
                        // may predate updates from below that met the mark.
                        // SAFETY: as above.
                        if let Some(successor) = unsafe { relocated.as_ref() } {
                            self.rebalance_from(successor, guard);
                        }
                        return Ok(value);
                    }
                    Unlink::Contended => {
                        trace_log!(attempts, "remove: lock contended, backing off");
                        self.counters().lock_backoff();
                        backoff.snooze();
                    }
                    Unlink::Stale => {
                        trace_log!(attempts, "remove: validation under locks failed, retrying");
                    }
                }
            }

            self.counters().remove_retry();
            if !budget_allows(budget, attempts) {
                return Err(attempts);
            }
            std::hint::spin_loop();
        }
    }

    /// Lock the neighbourhood of `n`, validate it, and unlink `n`.
    fn unlink<'g>(&self, n: &'g Node<K, V>, guard: &'g LocalGuard<'_>) -> Unlink<K, V> {
        let mut locks = LockSet::new();
        locks.lock(n);
        if n.is_marked() {
            return Unlink::Stale;
        }

        let g_ptr = n.parent();
        // SAFETY: an unmarked non-root node has a live parent.
        let g = unsafe { Node::deref(g_ptr, guard) };
        if !locks.try_lock(g) {
            return Unlink::Contended;
        }
        if g.is_marked() || n.parent() != g_ptr {
            return Unlink::Stale;
        }
        let Some(slot) = g.side_of(n.as_ptr()) else {
            return Unlink::Stale;
        };

        let (left, right) = (n.left(), n.right());

        // SAFETY: snapshot links are never null and are guard-protected.
        let a = unsafe { Node::deref(n.pred(), guard) };
        if !left.is_null() {
            if !locks.try_lock(a) {
                return Unlink::Contended;
            }
            if a.is_marked() || n.pred() != a.as_ptr() || !a.right().is_null() {
                return Unlink::Stale;
            }
        }

        // SAFETY: as above.
        let c = unsafe { Node::deref(n.succ(), guard) };
        if !right.is_null() {
            if !locks.try_lock(c) {
                return Unlink::Contended;
            }
            if c.is_marked() || n.succ() != c.as_ptr() || !c.left().is_null() {
                return Unlink::Stale;
            }
        }

        let mut successor_parent = None;
        if !left.is_null() && !right.is_null() {
            let cp_ptr = c.parent();
            // SAFETY: `c` is locked and linked below `n`.
            let cp = unsafe { Node::deref(cp_ptr, guard) };
            if !locks.try_lock(cp) {
                return Unlink::Contended;
            }
            if cp.is_marked() || c.parent() != cp_ptr || cp.side_of(c.as_ptr()).is_none() {
                return Unlink::Stale;
            }
            successor_parent = Some(cp);
        }

        // Validated. From here on nothing can fail.
        locks.mark(n);
        let old = n.swap_value(std::ptr::null_mut());

        a.set_snapshot(Side::Right, c.as_ptr());
        c.set_snapshot(Side::Left, a.as_ptr());

        let (rebalance_at, relocated) = match successor_parent {
            None => {
                let only = if left.is_null() { right } else { left };
                if !only.is_null() {
                    // SAFETY: child of the locked node `n`.
                    unsafe { (*only).set_parent(g_ptr) };
                }
                g.set_child(slot, only);
                (g_ptr, std::ptr::null_mut())
            }
            Some(cp) => {
                let lowest = Self::relocate(n, g, slot, c, cp);
                let relocated = if std::ptr::eq(lowest, c) {
                    std::ptr::null_mut()
                } else {
                    c.as_ptr()
                };
                (lowest, relocated)
            }
        };

        let value = (!old.is_null()).then(|| {
            // SAFETY: `old` was the tree's reference; the clone is handed
            // to the caller and the tree's reference retired.
            unsafe {
                let value = Node::<K, V>::clone_value(old);
                Node::<K, V>::retire_value(old, guard);
                value
            }
        });

        drop(locks);
        trace_log!(two_children = successor_parent.is_some(), "remove: unlinked");
        Unlink::Done {
            value,
            rebalance_at,
            relocated,
        }
    }

    /// Move `c`, the in-order successor of the two-child node `n`, into
    /// `n`'s slot under `g`. Returns the lowest node whose subtree shrank.
    fn relocate(
        n: &Node<K, V>,
        g: &Node<K, V>,
        slot: Side,
        c: &Node<K, V>,
        cp: &Node<K, V>,
    ) -> *mut Node<K, V> {
        let (left, right) = (n.left(), n.right());
        let from_below = !std::ptr::eq(cp, n);

        if from_below {
            // Detach `c` first so no descent can cycle through it.
            let c_right = c.right();
            cp.set_child(Side::Left, c_right);
            if !c_right.is_null() {
                // SAFETY: child of the locked node `c`.
                unsafe { (*c_right).set_parent(cp.as_ptr()) };
            }
            c.set_child(Side::Right, right);
            // SAFETY: child of the locked node `n`.
            unsafe { (*right).set_parent(c.as_ptr()) };
        }

        c.set_child(Side::Left, left);
        // SAFETY: child of the locked node `n`.
        unsafe { (*left).set_parent(c.as_ptr()) };
        c.set_height(n.height());

        c.set_parent(g.as_ptr());
        g.set_child(slot, c.as_ptr());

        if from_below { cp.as_ptr() } else { c.as_ptr() }
    }
}

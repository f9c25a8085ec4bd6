//! Lock-free descent and snapshot validation.
//!
//! ```text
//!   search_for_key(k)                 traversal_invalid(n, k, dir)
//!   -----------------                 ----------------------------
//!   n = root                          dir == Less:    pred = n.left_snapshot
//!   loop:                                             invalid if pred.key >= k
//!     dir = cmp(k, n.key)             dir == Greater: succ = n.right_snapshot
//!     Equal      -> return (n, dir)                   invalid if succ.key <= k
//!     child empty -> return (n, dir)  then:           invalid if n.marked
//!     n = child
//! ```
//!
//! Snapshot links are exact in-order neighbours of every unmarked node. If
//! `k` lies strictly inside the gap between `n` and its neighbour on the
//! exit side, and `n` is still unmarked, no key equal to `k` was present at
//! the moment the snapshot was read, whatever path the descent took. That
//! is why a reader can be misdirected by rotations, relocations or
//! splices and still never return a wrong "not found".
//!
//! The snapshot is read before the mark: an unmarked observation then
//! certifies that the node was live when its snapshot was loaded.

use std::cmp::Ordering;

use seize::LocalGuard;

use crate::compare::Comparator;
use crate::node::{Node, Side};

use super::PavtTree;

impl<K, V, C: Comparator<K>> PavtTree<K, V, C> {
    /// Descend from the root toward `key` without taking any lock.
    ///
    /// Returns the last node visited and `compare(key, node.key)`. On
    /// `Equal` the node holds `key`; otherwise the descent stopped at an
    /// empty slot on the side given by the ordering. Neither outcome is
    /// trustworthy until validated.
    pub(super) fn search_for_key<'g>(
        &self,
        key: &K,
        guard: &'g LocalGuard<'_>,
    ) -> (&'g Node<K, V>, Ordering) {
        let mut node = self.root(guard);
        loop {
            let dir = self.compare(key, node.key());
            let Some(side) = Side::of(dir) else {
                return (node, dir);
            };

            let next = node.child(side);
            if next.is_null() {
                return (node, dir);
            }

            // SAFETY: loaded from a live link under `guard`.
            node = unsafe { Node::deref(next, guard) };
        }
    }

    /// Whether a descent for `key` that stopped at `node` heading `dir`
    /// may have raced with a structural change and must be discarded.
    ///
    /// `dir` must not be `Equal`.
    pub(super) fn traversal_invalid(
        &self,
        node: &Node<K, V>,
        key: &K,
        dir: Ordering,
        guard: &LocalGuard<'_>,
    ) -> bool {
        self.snapshot_stale(node, key, dir, guard) || node.is_marked()
    }

    /// Whether `key` fails to lie strictly between `node` and its in-order
    /// neighbour on the `dir` side.
    pub(super) fn snapshot_stale(
        &self,
        node: &Node<K, V>,
        key: &K,
        dir: Ordering,
        guard: &LocalGuard<'_>,
    ) -> bool {
        let Some(side) = Side::of(dir) else {
            return false;
        };

        // SAFETY: snapshot links are never null and name live or
        // guard-protected nodes.
        let bound = unsafe { Node::deref(node.snapshot(side), guard) };
        let rel = self.compare(bound.key(), key);
        match side {
            Side::Left => rel.is_ge(),
            Side::Right => rel.is_le(),
        }
    }
}

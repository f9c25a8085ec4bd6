//! AVL height maintenance and rotations.
//!
//! After an insert or removal changes a subtree, the writer walks upward
//! from the lowest affected node:
//!
//! ```text
//! loop at n (stop at the root sentinel):
//!   lock n
//!   marked -> continue at from.parent (the node we came from, relinked by
//!             the remover), or at n.parent if there is none
//!   bf = h(n.left) - h(n.right)
//!   |bf| <= 1: store h; unchanged and not pinned -> stop; else n.parent
//!   |bf| >= 2: unlock; lock {parent, n, heavy child, [inner grandchild]}
//!              (first blocking, rest try_lock; failure -> back off, retry)
//!              outer-heavy: rotate n
//!              inner-heavy: rotate child, then n; queue child
//!              continue at n, pin 2 levels
//! on stop: continue at a queued node, if any
//! ```
//!
//! Rotations rewrite child, parent and height fields only. In-order
//! adjacency never changes, so snapshot links stay exact and lock-free
//! readers crossing a rotation are caught by ordinary validation. A double
//! rotation applies both single rotations under one lock set.
//!
//! # Convergence
//!
//! A node's height is only stored under its lock, from its children's
//! current heights. Every writer that changes a node's height, or the
//! shape below it, goes on to recompute the node's current parent:
//!
//! - a height store is followed by a visit to the parent read after it;
//! - a walk that reaches a removed node follows the node it came from to
//!   that node's new parent, so an update racing the removal is not lost;
//! - the remover walks from the successor's old parent and from the
//!   successor itself;
//! - a rotation rechecks every node it lowered and the node it lifted,
//!   since heights below them may have moved after the rotation was
//!   decided.
//!
//! So the last recomputation of every node reads final child heights, and
//! once writers are quiescent every stored height is exact and every node
//! is balanced.

use seize::LocalGuard;

use crate::compare::Comparator;
use crate::config::Backoff;
use crate::node::{Node, Side};
use crate::tracing_helpers::trace_log;

#[cfg(test)]
use super::test_hooks::RebalanceStep;

use super::PavtTree;
use super::lockset::LockSet;

/// Levels rechecked after a rotation whatever their heights: the lowered
/// node and the node lifted above it.
const ROTATION_RECHECK: u8 = 2;

/// Outcome of an attempted rotation at one node.
enum Rotation<K, V> {
    /// Rotated; `lowered` moved down one level and is checked next. A
    /// double rotation also lowers the heavy child into `sibling`.
    Done {
        lowered: *mut Node<K, V>,
        sibling: Option<*mut Node<K, V>>,
    },
    /// A `try_lock` failed or the neighbourhood moved; back off and retry.
    Contended,
    /// Balanced once the locks were held.
    Unneeded,
    /// The node was removed concurrently.
    Removed,
}

impl<K, V, C: Comparator<K>> PavtTree<K, V, C> {
    /// Restore heights and AVL balance from `start` up to the root.
    pub(super) fn rebalance_from(&self, start: &Node<K, V>, guard: &LocalGuard<'_>) {
        let mut node_ptr = start.as_ptr();
        // The node whose check sent the walk to `node_ptr`.
        let mut from: *mut Node<K, V> = std::ptr::null_mut();
        let mut pinned: u8 = 0;
        // Lowered nodes still to recheck once the walk stops.
        let mut queued: Vec<*mut Node<K, V>> = Vec::new();
        let mut backoff = Backoff::new(self.config.backoff_spins());

        loop {
            if node_ptr.is_null() || std::ptr::eq(node_ptr, self.root) {
                let Some(next) = queued.pop() else {
                    return;
                };
                node_ptr = next;
                from = std::ptr::null_mut();
                pinned = 0;
                continue;
            }
            // SAFETY: loaded from a parent link, given, or queued, all under
            // `guard`.
            let node = unsafe { Node::deref(node_ptr, guard) };

            #[cfg(test)]
            self.hooks.call_rebalance_step(RebalanceStep::Lock(node_ptr as usize));

            let lock = node.lock().lock();
            if node.is_marked() {
                drop(lock);
                // SAFETY: `from` was reached under `guard`.
                node_ptr = match unsafe { from.as_ref() } {
                    Some(prev) if !prev.is_marked() => prev.parent(),
                    _ => node.parent(),
                };
                from = std::ptr::null_mut();
                trace_log!("rebalance: reached a removed node, following its replacement");
                continue;
            }
            let (lh, rh) = node.child_heights();
            if lh.abs_diff(rh) <= 1 {
                let height = 1 + lh.max(rh);
                let changed = height != node.height();
                if changed {
                    node.set_height(height);
                }
                drop(lock);
                if !changed && pinned == 0 {
                    let Some(next) = queued.pop() else {
                        return;
                    };
                    node_ptr = next;
                    from = std::ptr::null_mut();
                    continue;
                }
                pinned = pinned.saturating_sub(1);

                #[cfg(test)]
                self.hooks.call_rebalance_step(RebalanceStep::Climb(node_ptr as usize));

                from = node_ptr;
                node_ptr = node.parent();
                continue;
            }
            drop(lock);

            match self.rotate_at(node, guard) {
                Rotation::Done { lowered, sibling } => {
                    queued.extend(sibling);
                    node_ptr = lowered;
                    from = std::ptr::null_mut();
                    pinned = ROTATION_RECHECK;
                }
                Rotation::Contended => {
                    trace_log!("rebalance: rotation contended, backing off");
                    self.counters().lock_backoff();
                    backoff.snooze();
                }
                // Recheck; a removed node is redirected at the top of the loop.
                Rotation::Unneeded | Rotation::Removed => {}
            }
        }
    }

    /// Lock the neighbourhood of an unbalanced `node` and rotate it down.
    ///
    /// An outer-heavy child is lifted over `node`. Under an inner-heavy
    /// child the inner grandchild is lifted over both.
    fn rotate_at<'g>(&self, node: &'g Node<K, V>, guard: &'g LocalGuard<'_>) -> Rotation<K, V> {
        let parent_ptr = node.parent();
        if parent_ptr.is_null() {
            return Rotation::Removed;
        }
        // SAFETY: parent links name live or guard-protected nodes.
        let parent = unsafe { Node::deref(parent_ptr, guard) };

        let mut locks = LockSet::new();
        locks.lock(parent);
        if !locks.try_lock(node) {
            return Rotation::Contended;
        }
        if node.is_marked() {
            return Rotation::Removed;
        }
        if parent.is_marked() || node.parent() != parent_ptr || parent.side_of(node.as_ptr()).is_none() {
            return Rotation::Contended;
        }

        let (lh, rh) = node.child_heights();
        if lh.abs_diff(rh) <= 1 {
            return Rotation::Unneeded;
        }
        let heavy = if lh > rh { Side::Left } else { Side::Right };

        // SAFETY: the heavy side has height >= 2, so the slot is occupied;
        // `node` is locked, so the slot is stable.
        let child = unsafe { Node::deref(node.child(heavy), guard) };
        if !locks.try_lock(child) {
            return Rotation::Contended;
        }

        // Heights of `node`'s children may have moved before `child` was
        // locked; decide on fresh values.
        let (lh, rh) = node.child_heights();
        let still_heavy = match heavy {
            Side::Left => lh > rh + 1,
            Side::Right => rh > lh + 1,
        };
        if !still_heavy {
            return Rotation::Unneeded;
        }

        let (outer, inner) = (child.child(heavy), child.child(heavy.opposite()));
        // SAFETY: children of a locked node, protected by `guard`.
        let (outer_h, inner_h) = unsafe { (Node::height_of(outer), Node::height_of(inner)) };

        let grand = if outer_h >= inner_h {
            None
        } else {
            // SAFETY: inner_h > outer_h >= 0, so the slot is occupied.
            let grand = unsafe { Node::deref(inner, guard) };
            if !locks.try_lock(grand) {
                return Rotation::Contended;
            }
            Some(grand)
        };

        #[cfg(test)]
        self.hooks.call_rebalance_step(RebalanceStep::Rotate(node.as_ptr() as usize));

        match grand {
            None => {
                self.rotate(parent, node, child, heavy);
                Rotation::Done {
                    lowered: node.as_ptr(),
                    sibling: None,
                }
            }
            Some(grand) => {
                self.rotate(node, child, grand, heavy.opposite());
                self.rotate(parent, node, grand, heavy);
                Rotation::Done {
                    lowered: node.as_ptr(),
                    sibling: Some(child.as_ptr()),
                }
            }
        }
    }

    /// Lift `child` (the `side` child of `node`) into `node`'s slot under
    /// `parent`. All three must be locked by the caller.
    ///
    /// ```text
    ///      parent              parent
    ///        |                   |
    ///       node               child
    ///       /  \      ==>      /   \
    ///    child  c            a    node
    ///    /  \                     /  \
    ///   a   inner             inner   c
    /// ```
    /// (shown for `side == Left`)
    fn rotate(&self, parent: &Node<K, V>, node: &Node<K, V>, child: &Node<K, V>, side: Side) {
        let opposite = side.opposite();
        let inner = child.child(opposite);

        // Detach in an order that never forms a cycle for concurrent readers.
        node.set_child(side, inner);
        if !inner.is_null() {
            // SAFETY: child of a locked node.
            unsafe { (*inner).set_parent(node.as_ptr()) };
        }
        child.set_child(opposite, node.as_ptr());
        node.set_parent(child.as_ptr());

        child.set_parent(parent.as_ptr());
        if let Some(slot) = parent.side_of(node.as_ptr()) {
            parent.set_child(slot, child.as_ptr());
        }

        let (lh, rh) = node.child_heights();
        node.set_height(1 + lh.max(rh));
        let (lh, rh) = child.child_heights();
        child.set_height(1 + lh.max(rh));

        self.counters().rotation();
        trace_log!(?side, "rebalance: rotated");
    }
}

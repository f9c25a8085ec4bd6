//! Acquisition of several node locks without deadlock.
//!
//! Removal and rotation must hold up to five node locks at once. A
//! [`LockSet`] takes its first lock blocking and every further lock with
//! `try_lock`; if one of those fails the caller drops the whole set, backs
//! off, and starts over. A thread therefore only ever blocks while holding
//! nothing, which rules out lock-order cycles. Insert never needs a set: it
//! holds exactly one lock.

use crate::nodelock::LockGuard;
use crate::node::Node;

/// Locks held by one multi-node operation. Released on drop.
pub(super) struct LockSet<'g> {
    held: Vec<LockGuard<'g>>,
}

impl<'g> LockSet<'g> {
    pub(super) const fn new() -> Self {
        Self { held: Vec::new() }
    }

    /// Block until `node` is locked. Must be the first acquisition.
    pub(super) fn lock<K, V>(&mut self, node: &'g Node<K, V>) {
        debug_assert!(self.held.is_empty(), "blocking acquisition while holding locks");
        self.held.push(node.lock().lock());
    }

    /// Add `node` without blocking. Returns `true` if it is now held,
    /// including when it already was.
    #[must_use]
    pub(super) fn try_lock<K, V>(&mut self, node: &'g Node<K, V>) -> bool {
        if self.holds(node) {
            return true;
        }
        match node.lock().try_lock() {
            Some(guard) => {
                self.held.push(guard);
                true
            }
            None => false,
        }
    }

    pub(super) fn holds<K, V>(&self, node: &Node<K, V>) -> bool {
        self.held.iter().any(|g| g.guards(node.lock()))
    }

    /// Set `node`'s tombstone.
    ///
    /// # Panics
    /// Panics if `node` is not in the set.
    pub(super) fn mark<K, V>(&mut self, node: &Node<K, V>) {
        let guard = self
            .held
            .iter_mut()
            .find(|g| g.guards(node.lock()))
            .unwrap_or_else(|| panic!("marking a node whose lock is not held"));
        guard.mark();
    }
}

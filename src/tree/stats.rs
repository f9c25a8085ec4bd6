//! Per-tree contention counters.
//!
//! Every retry in the lookup, insert and remove loops and every backed-off
//! multi-lock acquisition bumps a relaxed counter. Counting is always on;
//! read the totals with [`PavtTree::stats`](crate::PavtTree::stats).

use std::sync::atomic::AtomicU64;

use crate::ordering::RELAXED;

/// Point-in-time copy of a tree's contention counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Lookups that discarded a traversal and started over.
    pub get_retries: u64,
    /// Inserts whose validation failed (locked or unlocked) and restarted.
    pub insert_retries: u64,
    /// Removals that restarted after failed validation or contention.
    pub remove_retries: u64,
    /// Multi-node lock acquisitions abandoned because a `try_lock` failed.
    pub lock_backoffs: u64,
    /// AVL rotations performed (a double rotation counts as two).
    pub rotations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    get_retries: AtomicU64,
    insert_retries: AtomicU64,
    remove_retries: AtomicU64,
    lock_backoffs: AtomicU64,
    rotations: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn get_retry(&self) {
        self.get_retries.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn insert_retry(&self) {
        self.insert_retries.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn remove_retry(&self) {
        self.remove_retries.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn lock_backoff(&self) {
        self.lock_backoffs.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn rotation(&self) {
        self.rotations.fetch_add(1, RELAXED);
    }

    pub(crate) fn snapshot(&self) -> TreeStats {
        TreeStats {
            get_retries: self.get_retries.load(RELAXED),
            insert_retries: self.insert_retries.load(RELAXED),
            remove_retries: self.remove_retries.load(RELAXED),
            lock_backoffs: self.lock_backoffs.load(RELAXED),
            rotations: self.rotations.load(RELAXED),
        }
    }

    pub(crate) fn reset(&self) {
        self.get_retries.store(0, RELAXED);
        self.insert_retries.store(0, RELAXED);
        self.remove_retries.store(0, RELAXED);
        self.lock_backoffs.store(0, RELAXED);
        self.rotations.store(0, RELAXED);
    }
}

//! Tree node: key, published value, links and the per-node lock.
//!
//! Every link is an `AtomicPtr` so lock-free readers can follow it while a
//! writer holding the relevant [`NodeLock`] rewrites it. Ownership is strictly
//! parent to child through `left`/`right`; `parent` and the two snapshot
//! links are non-owning.
//!
//! # Snapshot links
//!
//! `left_snapshot` is the node's in-order predecessor and `right_snapshot`
//! its successor. They are never followed during descent. A reader that
//! stops at a node uses the snapshot on its exit side as the bound of the
//! key gap next to that node (see `tree::traverse`).
//!
//! # Reclamation
//!
//! Nodes are heap-allocated with `Box` and, once unlinked, retired through
//! the tree's `seize::Collector`. A `&Node` obtained while a guard is active
//! stays valid until that guard is dropped.

use std::cmp::Ordering;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU32};

use seize::{Guard, LocalGuard};

use crate::nodelock::NodeLock;
use crate::ordering::{HEIGHT_ORD, LINK_LOAD, LINK_STORE, VALUE_LOAD, VALUE_SWAP};

/// Direction of a child slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

impl Side {
    /// Side a search for a key takes, given `compare(key, node.key)`.
    /// `None` on an exact match.
    #[inline]
    pub(crate) const fn of(dir: Ordering) -> Option<Self> {
        match dir {
            Ordering::Less => Some(Self::Left),
            Ordering::Greater => Some(Self::Right),
            Ordering::Equal => None,
        }
    }

    #[inline]
    pub(crate) const fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// A single tree node.
pub(crate) struct Node<K, V> {
    key: K,

    /// `Arc::into_raw` of the current value; null for sentinels.
    value: AtomicPtr<V>,

    /// 1 + max(child heights); 0 stands for an empty slot.
    height: AtomicU32,

    lock: NodeLock,

    parent: AtomicPtr<Node<K, V>>,
    left: AtomicPtr<Node<K, V>>,
    right: AtomicPtr<Node<K, V>>,

    left_snapshot: AtomicPtr<Node<K, V>>,
    right_snapshot: AtomicPtr<Node<K, V>>,
}

impl<K, V> Node<K, V> {
    /// Allocate a detached node and leak it as a raw pointer.
    ///
    /// `value` of `None` produces a sentinel.
    pub(crate) fn alloc(key: K, value: Option<Arc<V>>, parent: *mut Self) -> *mut Self {
        let value = value.map_or(ptr::null_mut(), |v| Arc::into_raw(v).cast_mut());
        Box::into_raw(Box::new(Self {
            key,
            value: AtomicPtr::new(value),
            height: AtomicU32::new(1),
            lock: NodeLock::new(),
            parent: AtomicPtr::new(parent),
            left: AtomicPtr::new(ptr::null_mut()),
            right: AtomicPtr::new(ptr::null_mut()),
            left_snapshot: AtomicPtr::new(ptr::null_mut()),
            right_snapshot: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    /// Borrow a node for the lifetime of a collector guard.
    ///
    /// # Safety
    /// `ptr` must be non-null and must have been reachable from the tree
    /// (or owned by the caller) at some point while `guard` was active.
    #[inline]
    pub(crate) unsafe fn deref<'g>(ptr: *mut Self, _guard: &'g LocalGuard<'_>) -> &'g Self {
        debug_assert!(!ptr.is_null(), "dereferenced an empty link");
        // SAFETY: nodes are retired via the collector, so they outlive every
        // guard that could have loaded them.
        unsafe { &*ptr }
    }

    #[inline]
    pub(crate) const fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub(crate) const fn lock(&self) -> &NodeLock {
        &self.lock
    }

    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        self.lock.is_marked()
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut Self {
        ptr::from_ref(self).cast_mut()
    }

    // ========================================================================
    //  Children
    // ========================================================================

    #[inline]
    pub(crate) fn child(&self, side: Side) -> *mut Self {
        match side {
            Side::Left => self.left.load(LINK_LOAD),
            Side::Right => self.right.load(LINK_LOAD),
        }
    }

    #[inline]
    pub(crate) fn set_child(&self, side: Side, child: *mut Self) {
        match side {
            Side::Left => self.left.store(child, LINK_STORE),
            Side::Right => self.right.store(child, LINK_STORE),
        }
    }

    #[inline]
    pub(crate) fn left(&self) -> *mut Self {
        self.child(Side::Left)
    }

    #[inline]
    pub(crate) fn right(&self) -> *mut Self {
        self.child(Side::Right)
    }

    /// Which slot of `self` holds `child`, if any.
    #[inline]
    pub(crate) fn side_of(&self, child: *mut Self) -> Option<Side> {
        if self.left() == child {
            Some(Side::Left)
        } else if self.right() == child {
            Some(Side::Right)
        } else {
            None
        }
    }

    // ========================================================================
    //  Parent and snapshots
    // ========================================================================

    #[inline]
    pub(crate) fn parent(&self) -> *mut Self {
        self.parent.load(LINK_LOAD)
    }

    #[inline]
    pub(crate) fn set_parent(&self, parent: *mut Self) {
        self.parent.store(parent, LINK_STORE);
    }

    /// In-order neighbour on `side`: predecessor for `Left`, successor for `Right`.
    #[inline]
    pub(crate) fn snapshot(&self, side: Side) -> *mut Self {
        match side {
            Side::Left => self.left_snapshot.load(LINK_LOAD),
            Side::Right => self.right_snapshot.load(LINK_LOAD),
        }
    }

    #[inline]
    pub(crate) fn set_snapshot(&self, side: Side, neighbour: *mut Self) {
        match side {
            Side::Left => self.left_snapshot.store(neighbour, LINK_STORE),
            Side::Right => self.right_snapshot.store(neighbour, LINK_STORE),
        }
    }

    #[inline]
    pub(crate) fn pred(&self) -> *mut Self {
        self.snapshot(Side::Left)
    }

    #[inline]
    pub(crate) fn succ(&self) -> *mut Self {
        self.snapshot(Side::Right)
    }

    // ========================================================================
    //  Height
    // ========================================================================

    #[inline]
    pub(crate) fn height(&self) -> u32 {
        self.height.load(HEIGHT_ORD)
    }

    #[inline]
    pub(crate) fn set_height(&self, height: u32) {
        self.height.store(height, HEIGHT_ORD);
    }

    /// Height of the subtree at `ptr`; 0 for an empty slot.
    ///
    /// # Safety
    /// `ptr` is null or a node protected by the caller's guard.
    #[inline]
    pub(crate) unsafe fn height_of(ptr: *mut Self) -> u32 {
        if ptr.is_null() {
            0
        } else {
            // SAFETY: caller guarantees protection.
            unsafe { (*ptr).height() }
        }
    }

    /// Heights of the left and right subtrees as currently linked.
    #[inline]
    pub(crate) fn child_heights(&self) -> (u32, u32) {
        // SAFETY: children of a node reachable under a guard are themselves
        // protected by that guard.
        unsafe { (Self::height_of(self.left()), Self::height_of(self.right())) }
    }

    // ========================================================================
    //  Value
    // ========================================================================

    #[inline]
    pub(crate) fn load_value(&self) -> *mut V {
        self.value.load(VALUE_LOAD)
    }

    /// Publish `new` (possibly null) and return the previous pointer.
    #[inline]
    pub(crate) fn swap_value(&self, new: *mut V) -> *mut V {
        self.value.swap(new, VALUE_SWAP)
    }

    /// Take a fresh strong reference to a published value.
    ///
    /// # Safety
    /// `ptr` must come from `Arc::into_raw` and must not have been reclaimed;
    /// loading it under a guard that is still active is sufficient.
    #[inline]
    pub(crate) unsafe fn clone_value(ptr: *mut V) -> Arc<V> {
        // SAFETY: the tree's own strong reference is alive per the contract.
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }

    /// Defer dropping the tree's reference to a replaced value.
    ///
    /// # Safety
    /// `ptr` must be an `Arc::into_raw` pointer that is no longer published.
    pub(crate) unsafe fn retire_value(ptr: *mut V, guard: &LocalGuard<'_>) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: unpublished, so only guard-protected readers can hold it.
        unsafe {
            guard.defer_retire(ptr, |p, _| drop(Arc::from_raw(p)));
        }
    }

    /// Defer freeing an unlinked node.
    ///
    /// # Safety
    /// `ptr` must be unreachable from the tree (child, parent and snapshot
    /// links of live nodes no longer name it) and retired exactly once.
    pub(crate) unsafe fn retire(ptr: *mut Self, guard: &LocalGuard<'_>) {
        // SAFETY: upheld by caller.
        unsafe {
            guard.defer_retire(ptr, |p, _| drop(Box::from_raw(p)));
        }
    }
}

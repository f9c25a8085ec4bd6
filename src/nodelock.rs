//! Per-node write lock and tombstone bit.
//!
//! [`NodeLock`] pairs a `parking_lot` raw mutex with the node's `marked`
//! flag. Readers never touch the mutex; they only load the flag. Writers
//! acquire a [`LockGuard`] and mutate the node's links while it is held.
//!
//! # Type-State Pattern
//! The tombstone can only be set through [`LockGuard::mark`], so marking a
//! node without holding its lock does not compile. The guard unlocks on drop
//! (panic-safe).
//!
//! ```rust
//! use pavtree::nodelock::NodeLock;
//!
//! let lock = NodeLock::new();
//! {
//!     let mut guard = lock.lock();
//!     assert!(lock.is_locked());
//!     guard.mark();
//! }
//! assert!(!lock.is_locked());
//! assert!(lock.is_marked());
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::AtomicBool;

use parking_lot::RawMutex;
use parking_lot::lock_api::RawMutex as _;

use crate::ordering::MARK_ORD;

// ============================================================================
//  NodeLock
// ============================================================================

/// Mutual exclusion for one node plus its tombstone flag.
pub struct NodeLock {
    raw: RawMutex,
    marked: AtomicBool,
}

// ============================================================================
//  LockGuard (Type-State Pattern)
// ============================================================================

/// Proof that a [`NodeLock`] is held.
///
/// Cannot be constructed except through [`NodeLock::lock`] or
/// [`NodeLock::try_lock`]. Guards are `!Send` via `PhantomData<*mut ()>`:
/// a parking-lot mutex must be released by the thread that acquired it.
#[must_use = "releasing a lock without using the guard is a logic error"]
pub struct LockGuard<'a> {
    lock: &'a NodeLock,
    _marker: PhantomData<*mut ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: a guard exists only while this thread holds `raw`.
        unsafe { self.lock.raw.unlock() };
    }
}

impl LockGuard<'_> {
    /// Set the tombstone. Irreversible.
    #[inline]
    pub fn mark(&mut self) {
        debug_assert!(
            !self.lock.marked.load(MARK_ORD),
            "node marked twice; removal must validate the tombstone under the lock"
        );
        self.lock.marked.store(true, MARK_ORD);
    }

    /// Whether this guard protects `lock`.
    #[inline]
    #[must_use]
    pub fn guards(&self, lock: &NodeLock) -> bool {
        std::ptr::eq(self.lock, lock)
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("marked", &self.lock.is_marked())
            .finish()
    }
}

impl NodeLock {
    /// Create an unlocked, unmarked lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raw: RawMutex::INIT,
            marked: AtomicBool::new(false),
        }
    }

    /// Whether the node has been logically deleted.
    #[inline]
    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.marked.load(MARK_ORD)
    }

    /// Whether some thread currently holds the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Acquire the lock, parking the thread while it is contended.
    #[must_use = "releasing a lock without using the guard is a logic error"]
    pub fn lock(&self) -> LockGuard<'_> {
        self.raw.lock();
        record_acquire();
        LockGuard {
            lock: self,
            _marker: PhantomData,
        }
    }

    /// Try to acquire the lock without blocking.
    ///
    /// # Returns
    /// `Some(guard)` if acquired, `None` if another thread holds it.
    #[must_use]
    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        if !self.raw.try_lock() {
            return None;
        }
        record_acquire();
        Some(LockGuard {
            lock: self,
            _marker: PhantomData,
        })
    }
}

impl Default for NodeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLock")
            .field("locked", &self.is_locked())
            .field("marked", &self.is_marked())
            .finish()
    }
}

// ============================================================================
//  Acquisition instrumentation (test builds)
// ============================================================================

#[cfg(test)]
thread_local! {
    static ACQUIRED: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

#[cfg(test)]
#[inline]
fn record_acquire() {
    ACQUIRED.with(|c| c.set(c.get() + 1));
}

#[cfg(not(test))]
#[inline(always)]
const fn record_acquire() {}

/// Number of node locks the calling thread has acquired so far.
#[cfg(test)]
pub(crate) fn locks_acquired_by_current_thread() -> u64 {
    ACQUIRED.with(std::cell::Cell::get)
}

//! Test hooks for deterministic interleavings.
//!
//! Each tree carries its own hook slots (test builds only), so a test that
//! parks a thread inside one tree never stalls unrelated tests running in
//! parallel.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Barrier;
//!
//! let barrier = Arc::new(Barrier::new(2));
//! let b = Arc::clone(&barrier);
//!
//! // Reader: pause between traversal and snapshot validation.
//! tree.hooks().set_after_traverse(Box::new(move || {
//!     b.wait(); // traversal done
//!     b.wait(); // writer finished
//! }));
//! ```

#![expect(clippy::unwrap_used, reason = "Fail fast in tests")]

use std::sync::Mutex;

/// Hook type: a boxed closure that takes no arguments.
pub type TestHook = Box<dyn Fn() + Send + Sync>;

/// A point in the rebalance walk, tagged with the address of the node
/// involved (`Node::as_ptr() as usize`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebalanceStep {
    /// About to lock the node. No lock is held.
    Lock(usize),
    /// The node's height was checked and its lock released; the walk has
    /// not read the node's parent link yet.
    Climb(usize),
    /// A rotation at the node is decided and every lock it needs is held.
    Rotate(usize),
}

/// Rebalance hook: returns `true` once it has done its job, after which it
/// is dropped. Returning `false` leaves it armed for later steps.
pub type StepHook = Box<dyn Fn(RebalanceStep) -> bool + Send + Sync>;

/// Hook slots for one tree.
#[derive(Default)]
pub struct Hooks {
    /// Called by lookups after `search_for_key` returns and before the
    /// traversal is validated.
    after_traverse: Mutex<Option<TestHook>>,

    /// Called by inserts after locking and validating the parent and before
    /// the new child is linked. The parent's lock is held while it runs.
    before_link: Mutex<Option<TestHook>>,

    /// Called by the rebalance walk at every [`RebalanceStep`].
    rebalance_step: Mutex<Option<StepHook>>,
}

impl Hooks {
    /// Set the after-traverse hook.
    ///
    /// # Panics
    /// Panics if the hook was already set and not cleared.
    pub fn set_after_traverse(&self, hook: TestHook) {
        let mut slot = self.after_traverse.lock().unwrap();
        assert!(slot.is_none(), "after_traverse hook already set");
        *slot = Some(hook);
    }

    /// Set the before-link hook.
    ///
    /// # Panics
    /// Panics if the hook was already set and not cleared.
    pub fn set_before_link(&self, hook: TestHook) {
        let mut slot = self.before_link.lock().unwrap();
        assert!(slot.is_none(), "before_link hook already set");
        *slot = Some(hook);
    }

    /// Set the rebalance-step hook.
    ///
    /// # Panics
    /// Panics if a hook is armed.
    pub fn set_rebalance_step(&self, hook: StepHook) {
        let mut slot = self.rebalance_step.lock().unwrap();
        assert!(slot.is_none(), "rebalance_step hook already set");
        *slot = Some(hook);
    }

    /// Clear every hook.
    pub fn clear(&self) {
        *self.after_traverse.lock().unwrap() = None;
        *self.before_link.lock().unwrap() = None;
        *self.rebalance_step.lock().unwrap() = None;
    }

    /// Take the after-traverse hook out and run it. The hook fires once.
    pub(super) fn call_after_traverse(&self) {
        let hook = self.after_traverse.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Take the before-link hook out and run it. The hook fires once.
    pub(super) fn call_before_link(&self) {
        let hook = self.before_link.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Offer `step` to the rebalance hook. The hook runs outside the slot's
    /// mutex, so it may park while other threads walk.
    pub(super) fn call_rebalance_step(&self, step: RebalanceStep) {
        let Some(hook) = self.rebalance_step.lock().unwrap().take() else {
            return;
        };
        if hook(step) {
            return;
        }
        let mut slot = self.rebalance_step.lock().unwrap();
        if slot.is_none() {
            *slot = Some(hook);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

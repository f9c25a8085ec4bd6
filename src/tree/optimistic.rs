//! Lock-free lookups.
//!
//! ```text
//! loop:
//!   (n, dir) = search_for_key(k)
//!   dir == Equal:
//!     v = n.value; if !n.marked -> return v (None for a sentinel)
//!     marked -> node is mid-removal, retry
//!   traversal_invalid(n, k, dir) -> retry
//!   otherwise                    -> return None
//! ```
//!
//! No lock is ever acquired on this path. A retry happens only while a
//! writer is between two steps of a mutation that touches the gap the
//! reader stopped in, so the loop terminates as soon as that writer does.
//! Values are cloned out of the node after validation; the guard keeps the
//! `Arc` allocation alive even if a concurrent overwrite retires it.

use std::cmp::Ordering;
use std::sync::Arc;

use seize::LocalGuard;

use crate::compare::Comparator;
use crate::node::Node;
use crate::tracing_helpers::{trace_log, warn_log};

use super::{Operation, PavtTree, TreeError, budget_allows};

impl<K, V, C: Comparator<K>> PavtTree<K, V, C> {
    /// Look up `key`.
    ///
    /// Returns a clone of the stored `Arc`, or `None` if the key is absent.
    /// Never blocks.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let guard = self.guard();
        self.get_with_guard(key, &guard)
    }

    /// Look up `key` under a caller-held guard.
    #[must_use]
    pub fn get_with_guard(&self, key: &K, guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        match self.lookup(key, None, guard) {
            Ok(value) => value,
            Err(attempts) => unreachable!("unbounded lookup stopped after {attempts} attempts"),
        }
    }

    /// Whether `key` is present. Never blocks.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let guard = self.guard();
        self.get_with_guard(key, &guard).is_some()
    }

    /// Look up `key`, giving up after the configured retry budget.
    ///
    /// # Errors
    /// [`TreeError::RetryLimitExceeded`] if every attempt raced with a
    /// writer. Keys outside the sentinel bounds are simply absent.
    pub fn try_get(&self, key: &K) -> Result<Option<Arc<V>>, TreeError> {
        let guard = self.guard();
        self.lookup(key, self.config.max_retries(), &guard)
            .map_err(|attempts| {
                warn_log!(attempts, "get: retry budget exhausted");
                TreeError::RetryLimitExceeded {
                    operation: Operation::Get,
                    attempts,
                }
            })
    }

    /// The lookup loop. `Err(attempts)` only when `budget` runs out.
    fn lookup(
        &self,
        key: &K,
        budget: Option<u32>,
        guard: &LocalGuard<'_>,
    ) -> Result<Option<Arc<V>>, u32> {
        if !self.in_bounds(key) {
            return Ok(None);
        }

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let (node, dir) = self.search_for_key(key, guard);

            #[cfg(test)]
            self.hooks.call_after_traverse();

            if dir == Ordering::Equal {
                let value = node.load_value();
                if !node.is_marked() {
                    if value.is_null() {
                        return Ok(None);
                    }
                    // SAFETY: loaded under `guard` while the node was live.
                    return Ok(Some(unsafe { Node::<K, V>::clone_value(value) }));
                }
                trace_log!(attempts, "get: matched a node being removed, retrying");
            } else if !self.traversal_invalid(node, key, dir, guard) {
                return Ok(None);
            } else {
                trace_log!(attempts, "get: snapshot invalidated, retrying");
            }

            self.counters().get_retry();
            if !budget_allows(budget, attempts) {
                return Err(attempts);
            }
            std::hint::spin_loop();
        }
    }
}

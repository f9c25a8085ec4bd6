//! Standard memory orderings for concurrent node access.
//!
//! These constants keep ordering usage consistent across the crate and make
//! the intent clear at each access point.
//!
//! Child links, snapshot links, the tombstone bit and heights take part in
//! the lookup validation argument: a reader that observes an old snapshot
//! must be ordered before the link store that follows it in the writer. That
//! argument spans several locations, so those accesses are sequentially
//! consistent rather than acquire/release.

use std::sync::atomic::Ordering;

/// Ordering for loading child, parent and snapshot links.
pub const LINK_LOAD: Ordering = Ordering::SeqCst;

/// Ordering for storing child, parent and snapshot links under a node lock.
pub const LINK_STORE: Ordering = Ordering::SeqCst;

/// Ordering for the tombstone bit (load and store).
pub const MARK_ORD: Ordering = Ordering::SeqCst;

/// Ordering for height loads and stores.
pub const HEIGHT_ORD: Ordering = Ordering::SeqCst;

/// Ordering for reading a published value pointer.
/// Pairs with [`VALUE_SWAP`].
pub const VALUE_LOAD: Ordering = Ordering::Acquire;

/// Ordering for swapping a value pointer (publish new, take old).
pub const VALUE_SWAP: Ordering = Ordering::AcqRel;

/// Ordering for statistics counters and the entry count.
/// Counters carry no synchronization.
pub const RELAXED: Ordering = Ordering::Relaxed;

//! # `pavtree`
//!
//! A concurrent ordered map: an AVL tree whose lookups never lock.
//!
//! Every node carries links to its in-order predecessor and successor (its
//! *snapshot*). A lookup descends without synchronization and, if it does
//! not find the key, checks that the key lies strictly inside the gap
//! between the node it stopped at and that node's neighbour on the exit
//! side. Writers keep the snapshot links exact, so a gap that still holds
//! the key proves absence no matter how the descent was misdirected by
//! concurrent rotations. A failed check means a writer raced the lookup,
//! and the lookup retries.
//!
//! Writers lock only the nodes they rewrite:
//!
//! | Operation | Locks |
//! |-----------|-------|
//! | `get`, `contains`, `range` | none |
//! | `insert` | the parent of the new node, or the matched node |
//! | `remove` | the node, its parent, and up to three neighbours |
//! | rebalancing | the rotated nodes and their parent |
//!
//! Nodes and replaced values are reclaimed through `seize`.
//!
//! ## Sentinels
//!
//! A tree is built with a minimum and a maximum sentinel key. Stored keys
//! must compare strictly between them: `insert` panics on anything else,
//! `try_insert` returns [`TreeError::KeyOutOfBounds`], and lookups and
//! removals report such keys as absent.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//!
//! use pavtree::PavtTree;
//!
//! let tree = Arc::new(PavtTree::<u64, u64>::new(0, u64::MAX));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let tree = Arc::clone(&tree);
//!         thread::spawn(move || {
//!             for i in 1..=100 {
//!                 tree.insert(t * 1000 + i, i);
//!             }
//!         })
//!     })
//!     .collect();
//! for h in handles {
//!     h.join().unwrap();
//! }
//!
//! assert_eq!(tree.len(), 400);
//! assert_eq!(tree.get(&2050).as_deref(), Some(&50));
//! assert_eq!(tree.remove(&2050).as_deref(), Some(&50));
//! assert!(!tree.contains(&2050));
//! ```
//!
//! ## Thread Safety
//!
//! `PavtTree<K, V, C>` is `Send + Sync` when `K`, `V` and `C` are. Values
//! are handed out as `Arc<V>` clones, which stay valid after the key is
//! overwritten or removed.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod compare;
pub mod config;
pub mod nodelock;
pub mod ordering;
pub mod tree;

mod node;
mod tracing_helpers;

pub use compare::{Comparator, FnComparator, NaturalOrder};
pub use config::TreeConfig;
pub use tree::{InvariantViolation, Operation, PavtTree, Range, TreeError, TreeShape, TreeStats};

//! Structural invariant checker.
//!
//! Walks the whole tree and checks every structural invariant at once. The
//! result is only meaningful while no writer is in flight; tests call it
//! between phases and after joining their threads.

use std::fmt as StdFmt;

use seize::LocalGuard;

use crate::compare::Comparator;
use crate::node::{Node, Side};
use crate::ordering::RELAXED;

use super::PavtTree;

/// Shape of a tree that passed [`PavtTree::check_invariants`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    /// Number of user keys.
    pub len: usize,
    /// Height of the root sentinel's right subtree.
    pub height: u32,
}

/// A broken structural invariant.
///
/// Positions are in-order indices, where 0 is the minimum sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// In-order keys are not strictly increasing at `position`.
    Unordered {
        /// In-order index of the later key.
        position: usize,
    },
    /// A sentinel is not at its end of the in-order sequence, or the root
    /// has a left child.
    SentinelMisplaced,
    /// The predecessor or successor link at `position` disagrees with the
    /// in-order sequence.
    BrokenSnapshot {
        /// In-order index of the node whose link is wrong.
        position: usize,
        /// `"left"` or `"right"`.
        side: &'static str,
    },
    /// The parent link at `position` does not name the node holding it.
    BadParent {
        /// In-order index of the child.
        position: usize,
    },
    /// Stored height differs from the one computed from the children.
    HeightMismatch {
        /// In-order index of the node.
        position: usize,
        /// Height found in the node.
        stored: u32,
        /// One more than the taller child.
        computed: u32,
    },
    /// Child heights differ by more than one.
    Unbalanced {
        /// In-order index of the node.
        position: usize,
        /// Left subtree height.
        left: u32,
        /// Right subtree height.
        right: u32,
    },
    /// A reachable node carries the removal mark.
    MarkedNode {
        /// In-order index of the node.
        position: usize,
    },
    /// `len()` disagrees with the number of reachable user keys.
    CountMismatch {
        /// Keys reachable from the root.
        counted: usize,
        /// Value of `len()`.
        recorded: usize,
    },
}

impl StdFmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::Unordered { position } => {
                write!(f, "keys out of order at in-order position {position}")
            }
            Self::SentinelMisplaced => write!(f, "sentinel node out of place"),
            Self::BrokenSnapshot { position, side } => {
                write!(f, "{side} snapshot link wrong at position {position}")
            }
            Self::BadParent { position } => {
                write!(f, "parent link wrong at position {position}")
            }
            Self::HeightMismatch {
                position,
                stored,
                computed,
            } => write!(
                f,
                "height at position {position} is {stored}, expected {computed}"
            ),
            Self::Unbalanced {
                position,
                left,
                right,
            } => write!(
                f,
                "node at position {position} unbalanced: left height {left}, right height {right}"
            ),
            Self::MarkedNode { position } => {
                write!(f, "removed node still linked at position {position}")
            }
            Self::CountMismatch { counted, recorded } => {
                write!(f, "found {counted} keys but len() is {recorded}")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

impl<K, V, C: Comparator<K>> PavtTree<K, V, C> {
    /// Check every structural invariant.
    ///
    /// Call only while no writer is running.
    ///
    /// # Errors
    /// The first [`InvariantViolation`] found.
    pub fn check_invariants(&self) -> Result<TreeShape, InvariantViolation> {
        let guard = self.guard();
        let root = self.root(&guard);

        if !root.left().is_null() || !root.parent().is_null() {
            return Err(InvariantViolation::SentinelMisplaced);
        }

        let mut order: Vec<&Node<K, V>> = Vec::new();
        order.push(root);
        let height = self.check_subtree(root.right(), root, &mut order, &guard)?;

        let last = order.len() - 1;
        if order.len() < 2 || !std::ptr::eq(order[last].as_ptr(), self.max_sentinel) {
            return Err(InvariantViolation::SentinelMisplaced);
        }

        for (i, pair) in order.windows(2).enumerate() {
            let (lo, hi) = (pair[0], pair[1]);
            let position = i + 1;
            if self.compare(lo.key(), hi.key()).is_ge() {
                return Err(InvariantViolation::Unordered { position });
            }
            if hi.pred() != lo.as_ptr() {
                return Err(InvariantViolation::BrokenSnapshot {
                    position,
                    side: "left",
                });
            }
            if lo.succ() != hi.as_ptr() {
                return Err(InvariantViolation::BrokenSnapshot {
                    position: i,
                    side: "right",
                });
            }
        }

        let counted = order.len() - 2;
        let recorded = self.count.load(RELAXED);
        if counted != recorded {
            return Err(InvariantViolation::CountMismatch { counted, recorded });
        }

        Ok(TreeShape {
            len: counted,
            height,
        })
    }

    /// Check the subtree at `ptr` (child of `parent`), appending its nodes to
    /// `order` in key order. Returns the computed height.
    fn check_subtree<'g>(
        &self,
        ptr: *mut Node<K, V>,
        parent: &Node<K, V>,
        order: &mut Vec<&'g Node<K, V>>,
        guard: &'g LocalGuard<'_>,
    ) -> Result<u32, InvariantViolation> {
        if ptr.is_null() {
            return Ok(0);
        }
        // SAFETY: reachable from the root under `guard`.
        let node = unsafe { Node::deref(ptr, guard) };

        let left = self.check_subtree(node.child(Side::Left), node, order, guard)?;
        let position = order.len();
        order.push(node);
        let right = self.check_subtree(node.child(Side::Right), node, order, guard)?;

        if node.parent() != parent.as_ptr() {
            return Err(InvariantViolation::BadParent { position });
        }
        if node.is_marked() {
            return Err(InvariantViolation::MarkedNode { position });
        }
        let computed = 1 + left.max(right);
        let stored = node.height();
        if stored != computed {
            return Err(InvariantViolation::HeightMismatch {
                position,
                stored,
                computed,
            });
        }
        if left.abs_diff(right) > 1 {
            return Err(InvariantViolation::Unbalanced {
                position,
                left,
                right,
            });
        }
        Ok(computed)
    }
}

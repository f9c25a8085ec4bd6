//! Ordered iteration over a key range.
//!
//! [`Range`] walks the owning child links in order with an explicit stack,
//! under one collector guard held for its whole lifetime. It is lazy: only
//! the spine toward the next key is materialized.
//!
//! Concurrent writers may move subtrees under the walk. The iterator
//! tolerates that by emitting keys strictly monotonically (anything not
//! beyond the last emitted key is skipped) and by skipping marked nodes.
//! It never yields a key twice or out of order, but it may miss keys a
//! rotation moved behind it.

use std::fmt as StdFmt;
use std::iter::FusedIterator;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use seize::LocalGuard;

use crate::compare::Comparator;
use crate::node::{Node, Side};

use super::PavtTree;

/// Iterator over `(key, value)` pairs in a key range.
///
/// Created by [`PavtTree::range`], [`PavtTree::range_rev`],
/// [`PavtTree::iter`] and [`PavtTree::iter_rev`].
pub struct Range<'a, K, V, C> {
    tree: &'a PavtTree<K, V, C>,
    guard: LocalGuard<'a>,
    stack: Vec<*mut Node<K, V>>,
    start: Bound<K>,
    end: Bound<K>,
    ascending: bool,
    last: Option<K>,
}

impl<K: Clone, V, C: Comparator<K>> PavtTree<K, V, C> {
    /// Iterate ascending over the keys in `bounds`.
    ///
    /// ```rust
    /// use pavtree::PavtTree;
    ///
    /// let tree: PavtTree<u32, u32> = PavtTree::new(0, 1000);
    /// for k in 1..=10 {
    ///     tree.insert(k, k * k);
    /// }
    /// let keys: Vec<u32> = tree.range(3..6).map(|(k, _)| k).collect();
    /// assert_eq!(keys, [3, 4, 5]);
    /// ```
    pub fn range<R: RangeBounds<K>>(&self, bounds: R) -> Range<'_, K, V, C> {
        Range::new(self, bounds.start_bound().cloned(), bounds.end_bound().cloned(), true)
    }

    /// Iterate descending over the keys in `bounds`.
    pub fn range_rev<R: RangeBounds<K>>(&self, bounds: R) -> Range<'_, K, V, C> {
        Range::new(self, bounds.start_bound().cloned(), bounds.end_bound().cloned(), false)
    }

    /// Iterate ascending over every key.
    pub fn iter(&self) -> Range<'_, K, V, C> {
        Range::new(self, Bound::Unbounded, Bound::Unbounded, true)
    }

    /// Iterate descending over every key.
    pub fn iter_rev(&self) -> Range<'_, K, V, C> {
        Range::new(self, Bound::Unbounded, Bound::Unbounded, false)
    }
}

impl<'a, K, V, C: Comparator<K>> Range<'a, K, V, C> {
    fn new(tree: &'a PavtTree<K, V, C>, start: Bound<K>, end: Bound<K>, ascending: bool) -> Self {
        let mut range = Self {
            tree,
            guard: tree.guard(),
            stack: Vec::new(),
            start,
            end,
            ascending,
            last: None,
        };
        range.descend(tree.root);
        range
    }

    /// Side the walk heads toward first (the smaller keys when ascending).
    const fn near(&self) -> Side {
        if self.ascending { Side::Left } else { Side::Right }
    }

    fn below_start(&self, key: &K) -> bool {
        match &self.start {
            Bound::Included(s) => self.tree.compare(key, s).is_lt(),
            Bound::Excluded(s) => self.tree.compare(key, s).is_le(),
            Bound::Unbounded => false,
        }
    }

    fn above_end(&self, key: &K) -> bool {
        match &self.end {
            Bound::Included(e) => self.tree.compare(key, e).is_gt(),
            Bound::Excluded(e) => self.tree.compare(key, e).is_ge(),
            Bound::Unbounded => false,
        }
    }

    /// Whether `key` comes before the range in walk order.
    fn before_range(&self, key: &K) -> bool {
        if self.ascending { self.below_start(key) } else { self.above_end(key) }
    }

    /// Whether `key` comes after the range in walk order.
    fn after_range(&self, key: &K) -> bool {
        if self.ascending { self.above_end(key) } else { self.below_start(key) }
    }

    /// Whether `key` is strictly beyond the last emitted key.
    fn advances(&self, key: &K) -> bool {
        self.last.as_ref().is_none_or(|last| {
            let rel = self.tree.compare(key, last);
            if self.ascending { rel.is_gt() } else { rel.is_lt() }
        })
    }

    /// Push the spine from `ptr` toward the next key in walk order,
    /// skipping subtrees that lie entirely before the range.
    fn descend(&mut self, mut ptr: *mut Node<K, V>) {
        let near = self.near();
        while !ptr.is_null() {
            // SAFETY: loaded from a child link under `self.guard`.
            let node = unsafe { Node::deref(ptr, &self.guard) };
            if self.before_range(node.key()) {
                ptr = node.child(near.opposite());
            } else {
                self.stack.push(ptr);
                ptr = node.child(near);
            }
        }
    }
}

impl<K: Clone, V, C: Comparator<K>> Iterator for Range<'_, K, V, C> {
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        let far = self.near().opposite();
        loop {
            let ptr = self.stack.pop()?;
            // SAFETY: pushed from a child link under `self.guard`.
            let node = unsafe { Node::deref(ptr, &self.guard) };

            if self.after_range(node.key()) {
                self.stack.clear();
                return None;
            }

            let mut item = None;
            if !self.tree.is_sentinel(node) && !node.is_marked() && self.advances(node.key()) {
                let value = node.load_value();
                if !value.is_null() {
                    self.last = Some(node.key().clone());
                    // SAFETY: loaded under `self.guard`.
                    item = Some((node.key().clone(), unsafe { Node::<K, V>::clone_value(value) }));
                }
            }

            let next = node.child(far);
            self.descend(next);
            if item.is_some() {
                return item;
            }
        }
    }
}

impl<K: Clone, V, C: Comparator<K>> FusedIterator for Range<'_, K, V, C> {}

impl<K, V, C> StdFmt::Debug for Range<'_, K, V, C> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Range")
            .field("ascending", &self.ascending)
            .field("pending", &self.stack.len())
            .finish_non_exhaustive()
    }
}

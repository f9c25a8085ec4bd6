//! Key ordering contract.
//!
//! The tree never inspects keys beyond a three-way comparison. The
//! comparison must be total and must not change for any key that is stored
//! in a tree, since every structural invariant (search order, snapshot
//! bounds, range iteration) is phrased in terms of it.

use std::cmp::Ordering;
use std::fmt;

/// A total order over keys of type `K`.
pub trait Comparator<K: ?Sized> {
    /// Compare `a` with `b`.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Comparator<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Orders keys with a caller-supplied closure.
///
/// ```rust
/// use pavtree::{FnComparator, PavtTree};
///
/// // Reverse numeric order: the "minimum" sentinel is the largest number.
/// let by_desc = FnComparator::new(|a: &i64, b: &i64| b.cmp(a));
/// let tree: PavtTree<i64, &str, _> =
///     PavtTree::with_comparator(i64::MAX, i64::MIN, by_desc);
/// tree.insert(1, "one");
/// tree.insert(2, "two");
/// let keys: Vec<i64> = tree.iter().map(|(k, _)| k).collect();
/// assert_eq!(keys, vec![2, 1]);
/// ```
#[derive(Clone, Copy)]
pub struct FnComparator<F>(F);

impl<F> FnComparator<F> {
    /// Wrap a comparison closure.
    #[must_use]
    pub const fn new(compare: F) -> Self {
        Self(compare)
    }
}

impl<K: ?Sized, F> Comparator<K> for FnComparator<F>
where
    F: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        (self.0)(a, b)
    }
}

impl<F> fmt::Debug for FnComparator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComparator").finish_non_exhaustive()
    }
}

//! Pluggable key orderings.
//!
//! Every index is ordered by a [`Comparator`]. The overlay generations, the
//! merge iterator and the on-disk block search all go through the same
//! comparator instance, so an index never mixes two orderings.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A comparator shared between the overlay, the merge iterator and the disk
/// index of one tree.
pub type SharedComparator = Arc<dyn Comparator>;

/// Half-open key range `[from, to)`. `to == None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub from: Vec<u8>,
    /// Exclusive upper bound, or `None` for "up to the last key".
    pub to: Option<Vec<u8>>,
}

/// Total order over byte-string keys.
pub trait Comparator: Send + Sync {
    /// Stable name used to persist which comparator an index uses.
    fn name(&self) -> &str;

    /// Compares two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Converts a key prefix into the key range holding every key that starts
    /// with it.
    ///
    /// The default works for lexicographic orders: trailing `0xFF` bytes are
    /// stripped and the last remaining byte is incremented. A prefix that is
    /// empty or consists only of `0xFF` bytes has no finite successor, so the
    /// upper bound is unbounded.
    fn prefix_to_range(&self, prefix: &[u8]) -> KeyRange {
        lexicographic_prefix_range(prefix)
    }
}

impl fmt::Debug for dyn Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Comparator({})", self.name())
    }
}

/// Unsigned byte-wise lexicographic order (the default).
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicographicComparator;

impl LexicographicComparator {
    /// Name under which this comparator is persisted.
    pub const NAME: &'static str = "lexicographic";

    /// Returns a shared handle to the default comparator.
    #[must_use]
    pub fn shared() -> SharedComparator {
        Arc::new(LexicographicComparator)
    }
}

impl Comparator for LexicographicComparator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Prefix successor for byte-wise orders.
pub fn lexicographic_prefix_range(prefix: &[u8]) -> KeyRange {
    let mut upper = prefix.to_vec();
    while let Some(&last) = upper.last() {
        if last == u8::MAX {
            upper.pop();
        } else {
            let n = upper.len();
            upper[n - 1] = last + 1;
            return KeyRange {
                from: prefix.to_vec(),
                to: Some(upper),
            };
        }
    }
    KeyRange {
        from: prefix.to_vec(),
        to: None,
    }
}

/// Returns `true` if `key` lies within `[from, to)` under `order`.
pub fn in_range(order: &dyn Comparator, key: &[u8], from: Option<&[u8]>, to: Option<&[u8]>) -> bool {
    if let Some(f) = from {
        if order.compare(key, f) == Ordering::Less {
            return false;
        }
    }
    if let Some(t) = to {
        if order.compare(key, t) != Ordering::Less {
            return false;
        }
    }
    true
}

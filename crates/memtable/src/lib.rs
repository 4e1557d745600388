//! # Memtable - versioned in-memory overlay
//!
//! Each index keeps its recent writes in an [`OverlayTree`]: a chain of
//! [`Generation`]s, each a sorted map from key to value or tombstone. The
//! newest generation takes writes; older ones are frozen by
//! [`OverlayTree::create_snapshot`] and stay readable until the disk index
//! that contains them is linked in.
//!
//! Reads can be pinned to a snapshot id (`as_of`), in which case only
//! generations with `id <= as_of` are visible.
//!
//! Ordering is pluggable through [`Comparator`]; [`MergeIterator`] combines
//! sorted runs under the same comparator.

pub mod comparator;
pub mod generation;
pub mod merge;
pub mod overlay;

pub use comparator::{
    in_range, lexicographic_prefix_range, Comparator, KeyRange, LexicographicComparator,
    SharedComparator,
};
pub use generation::{Generation, OrderedKey};
pub use merge::{live_entries, MergeIterator, Source};
pub use overlay::{generation_sources_of, OverlayTree, FIRST_GENERATION};

//! K-way merge over sorted runs.
//!
//! Every source yields `(key, Option<value>)` pairs already sorted in the
//! requested direction. Sources are ranked by their position in the input
//! list: a later source is newer. When several sources hold the same key only
//! the entry from the newest source is emitted, the rest are drained.
//!
//! The merge keeps tombstones so that callers composing several layers can
//! still see deletes. [`live_entries`] filters them out.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::comparator::SharedComparator;

/// A sorted run feeding the merge.
pub type Source = Box<dyn Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> + Send>;

/// The current head of one source.
struct HeapEntry {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    /// Index into `sources`; doubles as the rank (higher = newer).
    source: usize,
    order: SharedComparator,
    ascending: bool,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap. Ascending scans want the smallest key on
        // top, descending scans the largest. Equal keys: newest source first.
        let keys = self.order.compare(&self.key, &other.key);
        let keys = if self.ascending { keys.reverse() } else { keys };
        keys.then_with(|| self.source.cmp(&other.source))
    }
}

/// Lazily merges several sorted sources into one sorted stream.
pub struct MergeIterator {
    sources: Vec<Source>,
    heap: BinaryHeap<HeapEntry>,
    order: SharedComparator,
    ascending: bool,
}

impl MergeIterator {
    /// Creates a merge over `sources`, oldest first.
    pub fn new(sources: Vec<Source>, order: SharedComparator, ascending: bool) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            order,
            ascending,
        };
        for i in 0..merge.sources.len() {
            merge.advance(i);
        }
        merge
    }

    fn advance(&mut self, source: usize) {
        if let Some((key, value)) = self.sources[source].next() {
            self.heap.push(HeapEntry {
                key,
                value,
                source,
                order: self.order.clone(),
                ascending: self.ascending,
            });
        }
    }
}

impl Iterator for MergeIterator {
    type Item = (Vec<u8>, Option<Vec<u8>>);

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.heap.pop()?;
        self.advance(top.source);

        // Older copies of the same key sit right below the winner.
        while let Some(peek) = self.heap.peek() {
            if self.order.compare(&peek.key, &top.key) != Ordering::Equal {
                break;
            }
            if let Some(dup) = self.heap.pop() {
                self.advance(dup.source);
            }
        }

        Some((top.key, top.value))
    }
}

/// Drops tombstones from a merged stream.
pub fn live_entries<I>(merged: I) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> + Send
where
    I: Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> + Send,
{
    merged.filter_map(|(k, v)| v.map(|v| (k, v)))
}

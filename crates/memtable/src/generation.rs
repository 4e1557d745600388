use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use crossbeam_skiplist::SkipMap;

use crate::comparator::SharedComparator;

/// A key tagged with the comparator of the tree it belongs to, so it can be
/// stored in ordered collections that rely on [`Ord`].
#[derive(Clone)]
pub struct OrderedKey {
    bytes: Vec<u8>,
    order: SharedComparator,
}

impl OrderedKey {
    pub fn new(bytes: Vec<u8>, order: SharedComparator) -> Self {
        Self { bytes, order }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for OrderedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OrderedKey").field(&self.bytes).finish()
    }
}

impl PartialEq for OrderedKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedKey {}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.bytes, &other.bytes)
    }
}

/// One overlay generation: a sorted map from key to value or tombstone.
///
/// `value == None` marks a delete. Only the current generation of an
/// [`OverlayTree`](crate::OverlayTree) receives writes; the skip map lets
/// readers scan it concurrently without locking.
pub struct Generation {
    id: u32,
    order: SharedComparator,
    map: SkipMap<OrderedKey, Option<Vec<u8>>>,
    approx_size: AtomicUsize,
}

impl Generation {
    pub fn new(id: u32, order: SharedComparator) -> Self {
        Self {
            id,
            order,
            map: SkipMap::new(),
            approx_size: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Stores `value` for `key`, replacing any previous entry.
    pub fn put(&self, key: Vec<u8>, value: Option<Vec<u8>>) {
        let added = key.len() + value.as_ref().map_or(0, Vec::len);
        let key = OrderedKey::new(key, self.order.clone());
        let removed = self
            .map
            .get(&key)
            .map_or(0, |old| old.key().bytes.len() + old.value().as_ref().map_or(0, Vec::len));
        self.map.insert(key, value);
        self.approx_size.fetch_add(added, AtomicOrdering::Relaxed);
        self.approx_size.fetch_sub(removed, AtomicOrdering::Relaxed);
    }

    /// Returns the decisive entry for `key`: `Some(None)` is a tombstone,
    /// `None` means this generation does not know the key.
    pub fn get(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let probe = OrderedKey::new(key.to_vec(), self.order.clone());
        self.map.get(&probe).map(|e| e.value().clone())
    }

    /// Collects the entries in `[from, to)` in the requested direction,
    /// tombstones included.
    pub fn range(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        ascending: bool,
    ) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        if let (Some(f), Some(t)) = (from, to) {
            if self.order.compare(f, t) != Ordering::Less {
                return Vec::new();
            }
        }
        let lower = match from {
            Some(f) => Bound::Included(OrderedKey::new(f.to_vec(), self.order.clone())),
            None => Bound::Unbounded,
        };
        let upper = match to {
            Some(t) => Bound::Excluded(OrderedKey::new(t.to_vec(), self.order.clone())),
            None => Bound::Unbounded,
        };
        let range = self.map.range((lower, upper));
        let entries = |e: crossbeam_skiplist::map::Entry<'_, OrderedKey, Option<Vec<u8>>>| {
            (e.key().bytes.clone(), e.value().clone())
        };
        if ascending {
            range.map(entries).collect()
        } else {
            range.rev().map(entries).collect()
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate memory used by keys and values.
    pub fn approx_size(&self) -> usize {
        self.approx_size.load(AtomicOrdering::Relaxed)
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("len", &self.map.len())
            .finish()
    }
}

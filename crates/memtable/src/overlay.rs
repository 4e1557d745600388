use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::comparator::SharedComparator;
use crate::generation::Generation;
use crate::merge::{live_entries, MergeIterator, Source};

/// Id of the first in-memory generation. The disk index counts as
/// generation 0.
pub const FIRST_GENERATION: u32 = 1;

/// A stack of overlay generations for one index.
///
/// The chain is kept newest-first: element 0 is the current (mutable)
/// generation, every later element is frozen. Writers only touch element 0.
/// [`create_snapshot`](Self::create_snapshot) and
/// [`release_up_to`](Self::release_up_to) publish a whole new chain through
/// one atomic swap, so readers always see a consistent list.
pub struct OverlayTree {
    order: SharedComparator,
    chain: ArcSwap<Vec<Arc<Generation>>>,
}

impl OverlayTree {
    pub fn new(order: SharedComparator) -> Self {
        let first = Arc::new(Generation::new(FIRST_GENERATION, order.clone()));
        Self {
            order,
            chain: ArcSwap::from_pointee(vec![first]),
        }
    }

    pub fn comparator(&self) -> &SharedComparator {
        &self.order
    }

    /// Loads the current generation chain, newest first.
    pub fn generations(&self) -> Arc<Vec<Arc<Generation>>> {
        self.chain.load_full()
    }

    /// Id of the generation currently receiving writes.
    pub fn current_id(&self) -> u32 {
        self.chain.load().first().map_or(FIRST_GENERATION, |g| g.id())
    }

    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) {
        self.current().put(key, Some(value));
    }

    /// Records a tombstone for `key` in the current generation.
    pub fn delete(&self, key: Vec<u8>) {
        self.current().put(key, None);
    }

    fn current(&self) -> Arc<Generation> {
        let chain = self.chain.load();
        match chain.first() {
            Some(g) => g.clone(),
            // the chain is never published empty
            None => unreachable!("overlay chain without a current generation"),
        }
    }

    /// Freezes the current generation and returns its id. A fresh generation
    /// with the next id becomes current.
    pub fn create_snapshot(&self) -> u32 {
        let mut frozen = 0;
        self.chain.rcu(|chain| {
            let current = chain.first().map_or(FIRST_GENERATION, |g| g.id());
            frozen = current;
            let mut next = Vec::with_capacity(chain.len() + 1);
            next.push(Arc::new(Generation::new(current + 1, self.order.clone())));
            next.extend(chain.iter().cloned());
            next
        });
        frozen
    }

    /// Drops frozen generations with id `<= id`. The current generation is
    /// never dropped.
    pub fn release_up_to(&self, id: u32) {
        self.chain.rcu(|chain| {
            chain
                .iter()
                .enumerate()
                .filter(|(i, g)| *i == 0 || g.id() > id)
                .map(|(_, g)| g.clone())
                .collect::<Vec<_>>()
        });
    }

    /// Newest decisive entry for `key` among generations `<= as_of`.
    ///
    /// `Some(None)` means the key was deleted in the overlay and the disk
    /// index must not be consulted.
    pub fn lookup_entry(&self, key: &[u8], as_of: Option<u32>) -> Option<Option<Vec<u8>>> {
        let chain = self.chain.load();
        chain
            .iter()
            .filter(|g| visible(g, as_of))
            .find_map(|g| g.get(key))
    }

    pub fn lookup(&self, key: &[u8], as_of: Option<u32>) -> Option<Vec<u8>> {
        self.lookup_entry(key, as_of).flatten()
    }

    /// Per-generation sorted runs for `[from, to)`, tombstones included,
    /// oldest first so the position in the returned list is the merge rank.
    pub fn generation_sources(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        ascending: bool,
        as_of: Option<u32>,
    ) -> Vec<Source> {
        let chain = self.chain.load_full();
        generation_sources_of(&chain, from, to, ascending, as_of)
    }

    /// Live entries in `[from, to)` merged over every visible generation.
    pub fn range_lookup(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        ascending: bool,
        as_of: Option<u32>,
    ) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> + Send {
        let sources = self.generation_sources(from, to, ascending, as_of);
        live_entries(MergeIterator::new(sources, self.order.clone(), ascending))
    }

    pub fn prefix_lookup(
        &self,
        prefix: &[u8],
        ascending: bool,
        as_of: Option<u32>,
    ) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> + Send {
        let range = self.order.prefix_to_range(prefix);
        self.range_lookup(Some(&range.from), range.to.as_deref(), ascending, as_of)
    }

    /// Total approximate size of all generations in memory.
    pub fn approx_size(&self) -> usize {
        self.chain.load().iter().map(|g| g.approx_size()).sum()
    }
}

impl std::fmt::Debug for OverlayTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayTree")
            .field("comparator", &self.order.name())
            .field("generations", &self.chain.load().len())
            .finish()
    }
}

fn visible(g: &Generation, as_of: Option<u32>) -> bool {
    as_of.map_or(true, |id| g.id() <= id)
}

/// Builds merge sources from an already loaded chain. Used when the caller
/// must pair the chain with a disk index loaded afterwards.
pub fn generation_sources_of(
    chain: &[Arc<Generation>],
    from: Option<&[u8]>,
    to: Option<&[u8]>,
    ascending: bool,
    as_of: Option<u32>,
) -> Vec<Source> {
    chain
        .iter()
        .rev()
        .filter(|g| visible(g, as_of))
        .map(|g| Box::new(g.range(from, to, ascending).into_iter()) as Source)
        .collect()
}

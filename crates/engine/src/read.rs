/// Read path: point lookups, prefix and range scans.
///
/// Direct reads run on the calling thread against the overlay generations
/// and the disk index without taking any lock. The `*_async` variants are
/// queued behind the writes already submitted for the same database, so
/// they observe every one of them.
use crate::database::LsmDatabase;
use crate::error::Result;
use crate::tree::TreeIter;
use crate::worker::{Pending, Request};
use crate::Engine;

impl Engine {
    /// Looks up `key` in index `index` of database `database`.
    ///
    /// Returns `None` if the key is absent or deleted.
    pub fn lookup(&self, database: &str, index: u32, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.database(database)?.index(index)?.lookup(key, None)
    }

    /// Live entries whose keys start with `prefix`, in index order (or
    /// reversed).
    pub fn prefix_lookup(&self, database: &str, index: u32, prefix: &[u8], ascending: bool) -> Result<TreeIter> {
        Ok(self
            .database(database)?
            .index(index)?
            .prefix_lookup(prefix, ascending, None))
    }

    /// Live entries in `[from, to)`. `None` bounds are open.
    pub fn range_lookup(
        &self,
        database: &str,
        index: u32,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        ascending: bool,
    ) -> Result<TreeIter> {
        Ok(self
            .database(database)?
            .index(index)?
            .range_lookup(from, to, ascending, None))
    }

    /// Point lookup executed by the worker owning the database.
    pub fn lookup_async(&self, database: &str, index: u32, key: Vec<u8>) -> Result<Pending<Option<Vec<u8>>>> {
        let (req, pending) = Request::lookup(self.database(database)?, index, key);
        self.workers.submit(req)?;
        Ok(pending)
    }

    /// Prefix scan executed by the worker owning the database. The result is
    /// collected before it is handed back.
    pub fn prefix_lookup_async(
        &self,
        database: &str,
        index: u32,
        prefix: Vec<u8>,
        ascending: bool,
    ) -> Result<Pending<Vec<(Vec<u8>, Vec<u8>)>>> {
        let (req, pending) = Request::prefix_lookup(self.database(database)?, index, prefix, ascending);
        self.workers.submit(req)?;
        Ok(pending)
    }

    /// Runs `f` on the worker owning the database, after every write queued
    /// before it.
    pub fn user_defined_lookup<T, F>(&self, database: &str, f: F) -> Result<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce(&LsmDatabase) -> Result<T> + Send + 'static,
    {
        let (req, pending) = Request::user_defined(self.database(database)?, f);
        self.workers.submit(req)?;
        Ok(pending)
    }
}

/// Write path: record group inserts.
///
/// Every group is routed to the worker owning its database, appended to the
/// log, and applied to the current overlay generation of each index it
/// touches. A group whose index ids are not all valid is rejected before it
/// is logged, so it is applied either completely or not at all.
use crate::error::Result;
use crate::record::RecordGroup;
use crate::worker::{Pending, Request};
use crate::Engine;

impl Engine {
    /// Inserts a record group and waits until it is applied.
    ///
    /// Outside pseudo-sync mode the group is durable when this returns.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoSuchDatabase`](crate::EngineError::NoSuchDatabase)
    ///   or [`NoSuchIndex`](crate::EngineError::NoSuchIndex) for unknown ids.
    /// - [`IoFailure`](crate::EngineError::IoFailure) if the log cannot be
    ///   written; the group is not applied.
    pub fn insert(&self, group: RecordGroup) -> Result<()> {
        self.submit_insert(group)?.wait()
    }

    /// Queues a record group and returns without waiting.
    ///
    /// Groups submitted for the same database are applied in submission
    /// order.
    pub fn submit_insert(&self, group: RecordGroup) -> Result<Pending<()>> {
        let db = self.database_by_id(group.database_id)?;
        let (req, pending) = Request::insert(db, group);
        self.workers.submit(req)?;
        Ok(pending)
    }

    /// Inserts a single key into index `index` of database `database`.
    pub fn put(&self, database: &str, index: u32, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let mut group = self.create_insert_group(database)?;
        group.insert(index, key, value);
        self.insert(group)
    }

    /// Deletes a single key from index `index` of database `database`.
    pub fn delete(&self, database: &str, index: u32, key: impl Into<Vec<u8>>) -> Result<()> {
        let mut group = self.create_insert_group(database)?;
        group.delete(index, key);
        self.insert(group)
    }
}

//! What a replication layer needs from the storage core. The core does not
//! depend on any replication code; a replication crate drives an engine
//! through this trait.

use wal::{LogEntry, Lsn};

use crate::database::SnapshotFile;
use crate::error::Result;
use crate::record::RecordGroup;
use crate::Engine;

/// Log shipping and snapshot transfer hooks.
pub trait ReplicationSource: Send + Sync {
    /// Applies a record group received from another node.
    fn apply_record_group(&self, group: RecordGroup) -> Result<()>;

    /// Log entries with `from <= lsn <= to`, in LSN order.
    fn read_log_range(&self, from: Lsn, to: Lsn) -> Result<Vec<LogEntry>>;

    /// Files of the newest on-disk snapshot of a database, with the chunk
    /// size the receiver should fetch them in.
    fn list_latest_snapshot_files(&self, database_id: u32, chunk_size: u64) -> Result<Vec<SnapshotFile>>;

    /// Highest LSN known to be durable.
    fn current_durable_lsn(&self) -> Lsn;
}

impl ReplicationSource for Engine {
    /// Goes through the regular write path, so the group is logged locally
    /// under a local LSN before it is applied.
    fn apply_record_group(&self, group: RecordGroup) -> Result<()> {
        self.insert(group)
    }

    fn read_log_range(&self, from: Lsn, to: Lsn) -> Result<Vec<LogEntry>> {
        Ok(wal::read_range(&self.inner.config.log_dir, from, to)?)
    }

    fn list_latest_snapshot_files(&self, database_id: u32, chunk_size: u64) -> Result<Vec<SnapshotFile>> {
        if chunk_size == 0 {
            return Err(crate::EngineError::InvalidArgument("chunk size must be positive".into()));
        }
        // a checkpoint must not replace the files while they are listed
        let _serial = self.inner.checkpoint_lock.lock();
        self.database_by_id(database_id)?.latest_snapshot_files(chunk_size)
    }

    fn current_durable_lsn(&self) -> Lsn {
        self.durable_lsn()
    }
}

/// Cold start: loading databases and replaying the log.
///
/// ## Steps
///
/// 1. Load the database catalog and every database from its newest disk
///    indices. All databases must be at the same on-disk LSN.
/// 2. Replay log entries newer than that LSN: record groups are applied,
///    persistent snapshots whose directory is missing are recreated.
/// 3. Cut off a torn entry at the end of the log.
/// 4. Start the log writer at the next LSN, then the workers and the
///    checkpointer.
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info};
use wal::{DiskLogger, LogEntry, Lsn, PayloadType};

use crate::checkpoint::Checkpointer;
use crate::database::LsmDatabase;
use crate::error::{EngineError, Result};
use crate::manifest::Manifest;
use crate::record::RecordGroup;
use crate::registry::ComparatorRegistry;
use crate::snapshot::{SnapshotConfig, SnapshotStore};
use crate::worker::{WorkerContext, WorkerPool};
use crate::{Engine, EngineConfig, EngineInner, DATABASES_DIR};
use sstable::WriterOptions;

/// What replay did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplayStats {
    pub(crate) applied: u64,
    pub(crate) skipped: u64,
    pub(crate) snapshots: u64,
}

impl Engine {
    /// Opens (or creates) the engine rooted at `config.base_dir`, using the
    /// lexicographic comparator only.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with(config, ComparatorRegistry::default())
    }

    /// Opens the engine with custom comparators available.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ConsistencyViolation`] if databases or their indices
    ///   disagree on the on-disk LSN, or the catalog cannot be parsed.
    /// - [`EngineError::CorruptEntry`] if the log is damaged anywhere but at
    ///   its very end.
    pub fn open_with(config: EngineConfig, registry: ComparatorRegistry) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.base_dir)?;
        fs::create_dir_all(config.base_dir.join(DATABASES_DIR))?;
        fs::create_dir_all(&config.log_dir)?;

        let options = WriterOptions {
            max_entries_per_block: config.max_entries_per_block,
            max_block_file_size: config.max_block_file_size,
            compressed: config.compression,
        };

        // 1. databases
        let manifest = Manifest::load_or_create(&config.base_dir)?;
        let mut databases = BTreeMap::new();
        for meta in &manifest.entries {
            let comparators = meta
                .comparators
                .iter()
                .map(|c| registry.resolve(c))
                .collect::<Result<Vec<_>>>()?;
            let dir = config.base_dir.join(DATABASES_DIR).join(&meta.name);
            let db = LsmDatabase::load(meta.id, &meta.name, &dir, &comparators, options)?;
            databases.insert(meta.id, Arc::new(db));
        }
        let ondisk = common_ondisk_lsn(&databases)?;

        // 2. + 3. log
        let snapshots = SnapshotStore::new(&config.base_dir);
        let (last, stats) = replay_log(&config, &databases, &snapshots, ondisk)?;
        info!(
            %ondisk,
            applied = stats.applied,
            skipped = stats.skipped,
            snapshots = stats.snapshots,
            "log replay done"
        );

        // 4. services
        let next = next_lsn(ondisk, last);
        let queue_len = config.max_queue_len.saturating_mul(config.num_workers);
        let logger = Arc::new(DiskLogger::start(&config.log_dir, next, config.durability, queue_len)?);
        let gate = Arc::new(RwLock::new(()));

        let inner = Arc::new(EngineInner {
            registry,
            options,
            manifest: Mutex::new(manifest),
            databases: RwLock::new(databases),
            logger: logger.clone(),
            gate: gate.clone(),
            checkpoint_lock: Mutex::new(()),
            checkpoint_lsn: Mutex::new(ondisk),
            snapshots,
            config: config.clone(),
        });
        let workers = WorkerPool::start(
            config.num_workers,
            config.max_queue_len,
            WorkerContext { logger, gate },
        )?;
        let checkpointer = if config.checkpoint_interval.is_zero() {
            None
        } else {
            Some(Checkpointer::start(
                inner.clone(),
                config.checkpoint_interval,
                config.max_log_size,
            )?)
        };

        info!(base_dir = %config.base_dir.display(), next = %next, "engine opened");
        Ok(Self {
            inner,
            workers,
            checkpointer: Mutex::new(checkpointer),
        })
    }
}

/// The on-disk LSN shared by all databases (`Lsn::NONE` without databases).
fn common_ondisk_lsn(databases: &BTreeMap<u32, Arc<LsmDatabase>>) -> Result<Lsn> {
    let mut common: Option<(Lsn, &str)> = None;
    for db in databases.values() {
        let lsn = db.ondisk_lsn();
        match common {
            None => common = Some((lsn, db.name())),
            Some((seen, other)) if seen != lsn => {
                return Err(EngineError::ConsistencyViolation(format!(
                    "databases have different on-disk LSNs: {other} at {seen}, {} at {lsn}",
                    db.name()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(common.map_or(Lsn::NONE, |(lsn, _)| lsn))
}

/// First LSN the log writer hands out.
fn next_lsn(ondisk: Lsn, last_replayed: Option<Lsn>) -> Lsn {
    let mut next = Lsn::FIRST;
    if ondisk != Lsn::NONE {
        next = next.max(ondisk.next());
    }
    if let Some(last) = last_replayed {
        next = next.max(last.next());
    }
    next
}

/// Replays every log entry after `ondisk` into the loaded databases and
/// truncates a torn tail. Returns the last LSN found in the log.
fn replay_log(
    config: &EngineConfig,
    databases: &BTreeMap<u32, Arc<LsmDatabase>>,
    snapshots: &SnapshotStore,
    ondisk: Lsn,
) -> Result<(Option<Lsn>, ReplayStats)> {
    let mut stats = ReplayStats::default();
    let outcome = wal::replay(&config.log_dir, |entry: LogEntry| -> Result<()> {
        if entry.lsn <= ondisk {
            stats.skipped += 1;
            return Ok(());
        }
        match entry.payload_type {
            PayloadType::Insert => {
                let group = RecordGroup::decode(&entry.payload)?;
                let Some(db) = databases.get(&group.database_id) else {
                    debug!(lsn = %entry.lsn, database = group.database_id, "skipping entry of deleted database");
                    stats.skipped += 1;
                    return Ok(());
                };
                db.apply(group)?;
                stats.applied += 1;
            }
            PayloadType::SnapshotConfig => {
                let (database_id, snapshot) = SnapshotConfig::decode(&entry.payload)?;
                if let Some(db) = databases.get(&database_id) {
                    snapshots.replay(db, &snapshot)?;
                    stats.snapshots += 1;
                }
            }
        }
        Ok(())
    })?;
    outcome.truncate_tail()?;
    Ok((outcome.last_lsn, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_lsn_starts_at_first() {
        assert_eq!(next_lsn(Lsn::NONE, None), Lsn::FIRST);
    }

    #[test]
    fn next_lsn_follows_checkpoint_when_log_is_empty() {
        assert_eq!(next_lsn(Lsn::new(1, 40), None), Lsn::new(1, 41));
    }

    #[test]
    fn next_lsn_follows_log_tail() {
        assert_eq!(next_lsn(Lsn::new(1, 40), Some(Lsn::new(1, 57))), Lsn::new(1, 58));
        assert_eq!(next_lsn(Lsn::new(1, 40), Some(Lsn::new(1, 12))), Lsn::new(1, 41));
    }
}

/// Database management: creating, deleting and finding databases.
///
/// Catalog changes are not logged. The manifest is rewritten before a new
/// database becomes visible and before a deleted one's files are removed;
/// log entries of deleted databases are skipped on replay because ids are
/// never reused.
use std::fs;
use std::sync::Arc;
use tracing::info;

use crate::database::LsmDatabase;
use crate::error::{EngineError, Result};
use crate::manifest::{validate_name, DatabaseMeta};
use crate::record::RecordGroup;
use crate::{Engine, DATABASES_DIR};

impl Engine {
    /// Creates a database with `num_indices` lexicographically ordered
    /// indices.
    pub fn create_database(&self, name: &str, num_indices: usize) -> Result<Arc<LsmDatabase>> {
        let names = vec![memtable::LexicographicComparator::NAME.to_string(); num_indices];
        self.create_database_with(name, &names)
    }

    /// Creates a database with one index per comparator name. Every name
    /// must be registered in the engine's [`ComparatorRegistry`](crate::ComparatorRegistry).
    ///
    /// # Errors
    ///
    /// - [`EngineError::DatabaseExists`] if the name is taken.
    /// - [`EngineError::InvalidArgument`] for an invalid name, no indices, or
    ///   an unknown comparator.
    pub fn create_database_with(&self, name: &str, comparators: &[String]) -> Result<Arc<LsmDatabase>> {
        validate_name(name)?;
        if comparators.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "database {name} needs at least one index"
            )));
        }
        let resolved = comparators
            .iter()
            .map(|c| self.inner.registry.resolve(c))
            .collect::<Result<Vec<_>>>()?;

        let inner = &self.inner;
        let _serial = inner.checkpoint_lock.lock();
        let mut manifest = inner.manifest.lock();
        if manifest.find(name).is_some() {
            return Err(EngineError::DatabaseExists(name.to_string()));
        }

        let dir = inner.config.base_dir.join(DATABASES_DIR).join(name);
        if dir.exists() {
            // left behind by a create or delete that did not finish
            fs::remove_dir_all(&dir)?;
        }
        let id = manifest.allocate_id();
        let ondisk = *inner.checkpoint_lsn.lock();
        let db = LsmDatabase::create(id, name, &dir, &resolved, inner.options, ondisk)?;

        manifest.add(DatabaseMeta {
            id,
            name: name.to_string(),
            comparators: comparators.to_vec(),
        });
        if let Err(e) = manifest.save() {
            manifest.remove(name);
            let _ = db.destroy();
            return Err(e);
        }

        let db = Arc::new(db);
        inner.databases.write().insert(id, db.clone());
        Ok(db)
    }

    /// Deletes a database, its disk indices and its persistent snapshots.
    ///
    /// Requests already queued for it still run against the detached
    /// database; nothing they write survives a restart.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        let inner = &self.inner;
        let _serial = inner.checkpoint_lock.lock();
        let mut manifest = inner.manifest.lock();
        let meta = manifest
            .remove(name)
            .ok_or_else(|| EngineError::NoSuchDatabase(name.to_string()))?;
        if let Err(e) = manifest.save() {
            manifest.add(meta);
            return Err(e);
        }

        let removed = inner.databases.write().remove(&meta.id);
        if let Some(db) = removed {
            db.destroy()?;
        }
        inner.snapshots.remove_database(name)?;
        info!(id = meta.id, database = name, "database deleted");
        Ok(())
    }

    /// Looks up a database by name.
    pub fn database(&self, name: &str) -> Result<Arc<LsmDatabase>> {
        self.inner
            .databases
            .read()
            .values()
            .find(|db| db.name() == name)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchDatabase(name.to_string()))
    }

    pub fn database_by_id(&self, id: u32) -> Result<Arc<LsmDatabase>> {
        self.inner
            .databases
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchDatabase(format!("#{id}")))
    }

    /// Names of all databases, ordered by id.
    pub fn database_names(&self) -> Vec<String> {
        self.inner
            .database_list()
            .iter()
            .map(|db| db.name().to_string())
            .collect()
    }

    /// Starts an empty record group for database `name`.
    pub fn create_insert_group(&self, name: &str) -> Result<RecordGroup> {
        Ok(RecordGroup::new(self.database(name)?.id()))
    }
}

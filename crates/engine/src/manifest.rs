/// # Manifest - Database Catalog
///
/// Records which databases exist, their ids, and the comparator of every
/// index, so that the engine can reopen them after a restart.
///
/// ## File Format
///
/// `<base_dir>/DATABASES`, one database per line:
///
/// ```text
/// NEXT:3
/// 0:users:2:lexicographic,lexicographic
/// 2:events:1:lexicographic
/// ```
///
/// `NEXT` holds the id the next database will receive; ids are never reused.
/// Lines starting with `#` are comments. Empty lines are ignored.
///
/// ## Crash Safety
///
/// The manifest is rewritten atomically: write to a `.tmp` file, fsync, then
/// rename over the existing manifest.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Name of the manifest file within the base directory.
pub const MANIFEST_FILENAME: &str = "DATABASES";

/// Temporary file used during atomic manifest writes.
const MANIFEST_TMP_FILENAME: &str = "DATABASES.tmp";

/// Catalog entry of one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseMeta {
    pub id: u32,
    pub name: String,
    /// Comparator name per index; its length is the number of indices.
    pub comparators: Vec<String>,
}

/// In-memory representation of the manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    next_id: u32,
    pub entries: Vec<DatabaseMeta>,
}

impl Manifest {
    /// Loads `base_dir/DATABASES`, or starts an empty catalog if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// [`EngineError::ConsistencyViolation`] if the file cannot be parsed.
    pub fn load_or_create(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(Self {
                path,
                next_id: 0,
                entries: Vec::new(),
            });
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut next_id = 0u32;
        let mut entries: Vec<DatabaseMeta> = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let bad = |what: &str| {
                EngineError::ConsistencyViolation(format!(
                    "manifest line {}: {what}: {trimmed}",
                    line_num + 1
                ))
            };

            if let Some(n) = trimmed.strip_prefix("NEXT:") {
                next_id = n.parse().map_err(|_| bad("invalid next id"))?;
                continue;
            }

            // Expected format: "<id>:<name>:<num_indices>:<cmp>,<cmp>"
            let mut fields = trimmed.splitn(4, ':');
            let (Some(id), Some(name), Some(count), Some(cmps)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(bad("expected '<id>:<name>:<indices>:<comparators>'"));
            };
            let id: u32 = id.parse().map_err(|_| bad("invalid id"))?;
            let count: usize = count.parse().map_err(|_| bad("invalid index count"))?;
            let comparators: Vec<String> = cmps.split(',').map(str::to_string).collect();
            if comparators.len() != count {
                return Err(bad("comparator count does not match index count"));
            }
            if entries.iter().any(|e| e.id == id || e.name == name) {
                return Err(bad("duplicate database"));
            }
            entries.push(DatabaseMeta {
                id,
                name: name.to_string(),
                comparators,
            });
        }

        // a missing or stale NEXT line must not hand out a used id
        let floor = entries.iter().map(|e| e.id + 1).max().unwrap_or(0);
        Ok(Self {
            path,
            next_id: next_id.max(floor),
            entries,
        })
    }

    /// Persists the catalog (tmp file, fsync, rename).
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            self.write_contents(&mut f)?;
            f.flush()?;
            f.sync_all()?;
        }

        // Rename over an open target can fail on Windows; fall back to an
        // in-place rewrite.
        if fs::rename(&tmp_path, &self.path).is_err() {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.write_contents(&mut f)?;
            f.flush()?;
            f.sync_all()?;
            let _ = fs::remove_file(&tmp_path);
        }
        Ok(())
    }

    fn write_contents(&self, f: &mut File) -> Result<()> {
        writeln!(f, "# Database catalog")?;
        writeln!(f, "# Format: <id>:<name>:<indices>:<comparator>,...")?;
        writeln!(f, "NEXT:{}", self.next_id)?;
        for e in &self.entries {
            writeln!(f, "{}:{}:{}:{}", e.id, e.name, e.comparators.len(), e.comparators.join(","))?;
        }
        Ok(())
    }

    /// Reserves the next database id (does **not** save to disk).
    pub fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn find(&self, name: &str) -> Option<&DatabaseMeta> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Adds an entry (does **not** save to disk).
    pub fn add(&mut self, meta: DatabaseMeta) {
        self.entries.push(meta);
    }

    /// Removes the entry named `name` (does **not** save to disk).
    pub fn remove(&mut self, name: &str) -> Option<DatabaseMeta> {
        let pos = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(pos))
    }
}

/// Database names double as directory names and manifest fields.
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a reserved path"
    } else if name.contains([':', '/', '\\', '\n', '\r']) {
        "name contains a reserved character"
    } else {
        return Ok(());
    };
    Err(EngineError::InvalidArgument(format!("database name {name:?}: {reason}")))
}

/// Comparator names are stored comma separated.
pub fn validate_comparator_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains([',', ':', '\n', '\r']) {
        return Err(EngineError::InvalidArgument(format!(
            "comparator name {name:?} cannot be stored in the manifest"
        )));
    }
    Ok(())
}

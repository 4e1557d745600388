//! # Config - engine configuration
//!
//! Every tunable consumed by the storage core lives in [`EngineConfig`]. The
//! core never reads files or environment variables itself; the embedding
//! process builds a config (usually from [`EngineConfig::new`] and the
//! builder setters) and hands it to `Engine::open`.
//!
//! ## Durability
//!
//! [`Durability`] selects how the write-ahead log confirms appends:
//!
//! | Mode           | fsync                     | caller acknowledged           |
//! |----------------|---------------------------|-------------------------------|
//! | `SyncPerWrite` | after every entry         | after its fsync               |
//! | `Group`        | once per window/batch     | after the batch fsync         |
//! | `PseudoSync`   | once per window           | right after the log append    |
//!
//! `PseudoSync` trades durability for latency: an acknowledged write can be
//! lost if the process dies before the next window closes. It must be
//! chosen explicitly.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default maximum size of a single block file (64 MiB).
pub const DEFAULT_MAX_BLOCK_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Default number of entries per on-disk block.
pub const DEFAULT_MAX_ENTRIES_PER_BLOCK: usize = 16;

/// Default log size that triggers a checkpoint (16 MiB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 16 * 1024 * 1024;

/// How the write-ahead log confirms durability of appended entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// fsync after each append; the request completes after its fsync.
    SyncPerWrite,
    /// Batch appends into one fsync. A batch closes when `window` has elapsed
    /// since its first entry or when it holds `max_batch` entries.
    Group {
        /// Maximum time the first entry of a batch waits for company.
        window: Duration,
        /// Maximum number of entries per fsync.
        max_batch: usize,
    },
    /// Apply and acknowledge before fsync; the log syncs every `window`.
    PseudoSync {
        /// Interval between background fsyncs.
        window: Duration,
    },
}

impl Durability {
    /// Returns `true` if workers acknowledge writes without waiting for fsync.
    #[must_use]
    pub const fn is_pseudo_sync(&self) -> bool {
        matches!(self, Durability::PseudoSync { .. })
    }
}

impl Default for Durability {
    fn default() -> Self {
        Durability::SyncPerWrite
    }
}

/// Errors reported by [`EngineConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric setting is out of its accepted range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending setting.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Configuration for opening an engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the database manifest and per-database snapshots.
    pub base_dir: PathBuf,

    /// Directory holding write-ahead log segments.
    pub log_dir: PathBuf,

    /// Number of worker threads (shards).
    pub num_workers: usize,

    /// Capacity of each worker queue (0 = unbounded).
    pub max_queue_len: usize,

    /// Log durability mode.
    pub durability: Durability,

    /// Upper bound for a single memory-mapped block file.
    pub max_block_file_size: u64,

    /// Maximum number of key/value pairs per on-disk block.
    pub max_entries_per_block: usize,

    /// Compress on-disk blocks with LZ4.
    pub compression: bool,

    /// How often the background checkpointer runs (`Duration::ZERO` = never).
    pub checkpoint_interval: Duration,

    /// Log size in bytes that triggers a checkpoint (0 = no size trigger).
    pub max_log_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("data/log"),
            num_workers: 1,
            max_queue_len: 1000,
            durability: Durability::SyncPerWrite,
            max_block_file_size: DEFAULT_MAX_BLOCK_FILE_SIZE,
            max_entries_per_block: DEFAULT_MAX_ENTRIES_PER_BLOCK,
            compression: false,
            checkpoint_interval: Duration::ZERO,
            max_log_size: DEFAULT_MAX_LOG_SIZE,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration rooted at `base_dir`, with the log in
    /// `base_dir/log` and defaults for everything else.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let log_dir = base_dir.join("log");
        Self {
            base_dir,
            log_dir,
            ..Self::default()
        }
    }

    /// Sets the log directory.
    #[must_use]
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Sets the per-worker queue capacity (0 = unbounded).
    #[must_use]
    pub fn max_queue_len(mut self, n: usize) -> Self {
        self.max_queue_len = n;
        self
    }

    /// Sets the durability mode.
    #[must_use]
    pub fn durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Sets the maximum size of a block file.
    #[must_use]
    pub fn max_block_file_size(mut self, size: u64) -> Self {
        self.max_block_file_size = size;
        self
    }

    /// Sets the maximum number of entries per block.
    #[must_use]
    pub fn max_entries_per_block(mut self, n: usize) -> Self {
        self.max_entries_per_block = n;
        self
    }

    /// Enables or disables block compression.
    #[must_use]
    pub fn compression(mut self, value: bool) -> Self {
        self.compression = value;
        self
    }

    /// Sets the background checkpoint interval.
    #[must_use]
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Sets the log size that triggers a checkpoint.
    #[must_use]
    pub fn max_log_size(mut self, size: u64) -> Self {
        self.max_log_size = size;
        self
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "num_workers",
                reason: "at least one worker is required",
            });
        }
        if self.max_entries_per_block == 0 {
            return Err(ConfigError::Invalid {
                field: "max_entries_per_block",
                reason: "must be positive",
            });
        }
        // block offsets are stored as u32
        if self.max_block_file_size == 0 || self.max_block_file_size > u64::from(u32::MAX) {
            return Err(ConfigError::Invalid {
                field: "max_block_file_size",
                reason: "must be between 1 and u32::MAX bytes",
            });
        }
        if let Durability::Group { max_batch, .. } = self.durability {
            if max_batch == 0 {
                return Err(ConfigError::Invalid {
                    field: "durability.max_batch",
                    reason: "must be positive",
                });
            }
        }
        Ok(())
    }
}

use std::io;

use thiserror::Error;
use wal::WalError;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors reported by the engine.
///
/// Per-request errors reach only the caller of that request. `IoFailure`
/// and `ConsistencyViolation` coming out of the log or startup mean the
/// component that raised them no longer serves requests.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Disk read, write or mmap failure.
    #[error("io failure: {0}")]
    IoFailure(#[from] io::Error),

    /// A log entry or record group failed validation.
    #[error("corrupt entry: {0}")]
    CorruptEntry(String),

    #[error("index {index} does not exist in database {database}")]
    NoSuchIndex { database: u32, index: u32 },

    #[error("no such database: {0}")]
    NoSuchDatabase(String),

    #[error("database already exists: {0}")]
    DatabaseExists(String),

    /// On-disk state that cannot be reconciled, e.g. indices of one database
    /// at different on-disk LSNs.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure inside the disk index layer.
    #[error("index error: {0:#}")]
    Index(#[from] anyhow::Error),
}

impl From<WalError> for EngineError {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => EngineError::IoFailure(io),
            corrupt @ WalError::Corrupt { .. } => EngineError::CorruptEntry(corrupt.to_string()),
            WalError::Closed => EngineError::ShuttingDown,
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        EngineError::InvalidArgument(e.to_string())
    }
}

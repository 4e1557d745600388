/// Checkpoints: writing the overlays of every database to disk so the log
/// can be truncated.
///
/// ## Steps
///
/// 1. Under the modification gate: freeze the current generation of every
///    index and switch the log segment. The last LSN of the closed segment is
///    the checkpoint LSN; every write up to it is in a frozen generation.
/// 2. Without the gate: materialize every database into scratch directories,
///    rename them to `IX<i>V<view>SEQ<seq>.idx`, then link them.
/// 3. Delete log segments the checkpoint covers.
///
/// Writes continue during step 2 and land in the new current generations.
/// When nothing was logged since the previous checkpoint, step 1 stops before
/// freezing anything.
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use wal::Lsn;

use crate::error::Result;
use crate::{Engine, EngineInner};

impl EngineInner {
    /// Runs one checkpoint. Returns the LSN everything is on disk up to.
    pub(crate) fn checkpoint(&self) -> Result<Lsn> {
        let _serial = self.checkpoint_lock.lock();
        let dbs = self.database_list();

        let previous = *self.checkpoint_lsn.lock();
        let (lsn, snaps) = {
            let _gate = self.gate.write();
            // Without new entries there is nothing to freeze.
            let written = self.logger.last_written_lsn();
            if written <= previous || written.seq == 0 {
                debug!(%written, %previous, "nothing to checkpoint");
                return Ok(previous);
            }
            let snaps: Vec<Vec<u32>> = dbs.iter().map(|db| db.create_snapshot()).collect();
            let lsn = self.logger.switch_segment()?;
            (lsn, snaps)
        };

        info!(%lsn, databases = dbs.len(), "checkpoint started");
        for (db, ids) in dbs.iter().zip(&snaps) {
            db.prepare_snapshot(lsn, ids)?;
        }
        for db in &dbs {
            db.commit_snapshot(lsn)?;
        }
        for (db, ids) in dbs.iter().zip(&snaps) {
            db.link_snapshot(lsn, ids)?;
        }
        *self.checkpoint_lsn.lock() = lsn;

        let removed = wal::delete_segments_before(self.logger.dir(), lsn)?;
        info!(%lsn, removed_segments = removed, "checkpoint complete");
        Ok(lsn)
    }
}

impl Engine {
    /// Writes every database to disk and truncates the log.
    ///
    /// Returns the LSN up to which all writes are now in disk indices. If
    /// nothing was written since the previous checkpoint, that checkpoint's
    /// LSN is returned and nothing is written.
    pub fn checkpoint(&self) -> Result<Lsn> {
        self.inner.checkpoint()
    }

    /// LSN of the latest checkpoint (`Lsn::NONE` if there was none).
    pub fn checkpoint_lsn(&self) -> Lsn {
        *self.inner.checkpoint_lsn.lock()
    }
}

/// Background thread running checkpoints.
///
/// Wakes every `interval` and checkpoints once the log has grown past
/// `max_log_size` since the last one (every time if `max_log_size` is 0).
pub(crate) struct Checkpointer {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Checkpointer {
    pub(crate) fn start(inner: Arc<EngineInner>, interval: Duration, max_log_size: u64) -> Result<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = stop.clone();
        let handle = thread::Builder::new()
            .name("lsm-checkpointer".into())
            .spawn(move || run(&inner, &signal, interval, max_log_size))?;
        info!(?interval, max_log_size, "checkpointer started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the thread. A checkpoint in progress finishes first.
    pub(crate) fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let (lock, cvar) = &*self.stop;
        *lock.lock() = true;
        cvar.notify_all();
        if handle.join().is_err() {
            warn!("checkpointer thread panicked");
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(inner: &EngineInner, stop: &(Mutex<bool>, Condvar), interval: Duration, max_log_size: u64) {
    let (lock, cvar) = stop;
    let mut stopped = lock.lock();
    loop {
        if *stopped {
            break;
        }
        cvar.wait_for(&mut stopped, interval);
        if *stopped {
            break;
        }
        let size = inner.logger.bytes_since_switch();
        if max_log_size > 0 && size <= max_log_size {
            continue;
        }
        let outcome = parking_lot::MutexGuard::unlocked(&mut stopped, || inner.checkpoint());
        if let Err(e) = outcome {
            warn!(error = %e, "background checkpoint failed");
        }
    }
    debug!("checkpointer stopped");
}

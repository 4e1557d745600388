//! The log-writer thread.
//!
//! All appends funnel through one channel into a single thread that owns the
//! active segment. LSNs are assigned there, so physical order in the file is
//! LSN order no matter how many workers feed the log.

use config::Durability;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::entry::{LogEntry, PayloadType};
use crate::segment::SegmentWriter;
use crate::{Lsn, WalError};

type Completion = Sender<Result<Lsn, WalError>>;

enum Command {
    Append {
        payload_type: PayloadType,
        payload: Vec<u8>,
        completion: Completion,
    },
    /// Close the active segment and start the next one.
    Switch { completion: Completion },
    /// fsync everything written so far.
    Sync { completion: Completion },
    Shutdown,
}

/// Handle to the outcome of one append.
#[derive(Debug)]
pub struct SyncHandle {
    rx: mpsc::Receiver<Result<Lsn, WalError>>,
}

impl SyncHandle {
    /// Blocks until the entry is durable (or, in pseudo-sync mode, written)
    /// and returns its LSN.
    pub fn wait(self) -> Result<Lsn, WalError> {
        self.rx.recv().unwrap_or(Err(WalError::Closed))
    }
}

struct SharedState {
    durable: Mutex<Lsn>,
    /// LSN of the last entry written to a segment, synced or not.
    written: Mutex<Lsn>,
    /// Bytes appended since the last segment switch.
    bytes_since_switch: AtomicU64,
    closed: AtomicBool,
    /// Set after the first I/O failure; the log refuses work from then on.
    failed: AtomicBool,
    failure: Mutex<Option<(io::ErrorKind, String)>>,
}

impl SharedState {
    fn failure(&self) -> Option<WalError> {
        if !self.failed.load(Ordering::Acquire) {
            return None;
        }
        self.failure.lock().as_ref().map(failure)
    }
}

/// The write-ahead log writer.
///
/// Cheap to share between worker threads (`Send + Sync`). Dropping it without
/// calling [`shutdown`](Self::shutdown) still stops the writer thread once
/// every sender is gone.
pub struct DiskLogger {
    dir: PathBuf,
    tx: SyncSender<Command>,
    state: Arc<SharedState>,
    durability: Durability,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl DiskLogger {
    /// Starts the writer thread. The first entry gets `next_lsn`; its segment
    /// is created right away.
    ///
    /// `queue_len` bounds the command channel (0 = effectively unbounded).
    pub fn start(
        dir: impl Into<PathBuf>,
        next_lsn: Lsn,
        durability: Durability,
        queue_len: usize,
    ) -> Result<Self, WalError> {
        let dir = dir.into();
        let segment = SegmentWriter::open(&dir, next_lsn)?;
        let state = Arc::new(SharedState {
            durable: Mutex::new(next_lsn.prev()),
            written: Mutex::new(next_lsn.prev()),
            bytes_since_switch: AtomicU64::new(segment.len()),
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        let capacity = if queue_len == 0 { 1 << 16 } else { queue_len };
        let (tx, rx) = mpsc::sync_channel(capacity);

        let mut writer = Writer {
            dir: dir.clone(),
            segment,
            next_lsn,
            last_written: next_lsn.prev(),
            durability,
            state: state.clone(),
            pending: Vec::new(),
            dirty: false,
        };
        let join = thread::Builder::new()
            .name("wal-writer".into())
            .spawn(move || writer.run(rx))?;

        info!(dir = %dir.display(), next = %next_lsn, ?durability, "disk logger started");
        Ok(Self {
            dir,
            tx,
            state,
            durability,
            join: Mutex::new(Some(join)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Queues an entry. Blocks only while the channel is full.
    ///
    /// Fails right away once an earlier write or sync has failed, so callers
    /// that never wait on the [`SyncHandle`] still see the failure.
    pub fn append(&self, payload_type: PayloadType, payload: Vec<u8>) -> Result<SyncHandle, WalError> {
        if let Some(e) = self.state.failure() {
            return Err(e);
        }
        let (completion, rx) = mpsc::channel();
        self.send(Command::Append {
            payload_type,
            payload,
            completion,
        })?;
        Ok(SyncHandle { rx })
    }

    /// Closes the active segment once everything queued before this call is
    /// written and synced, and opens a new one. Returns the LSN of the last
    /// entry in the closed segment.
    pub fn switch_segment(&self) -> Result<Lsn, WalError> {
        let (completion, rx) = mpsc::channel();
        self.send(Command::Switch { completion })?;
        rx.recv().unwrap_or(Err(WalError::Closed))
    }

    /// Forces an fsync and returns the durable LSN afterwards.
    pub fn sync(&self) -> Result<Lsn, WalError> {
        let (completion, rx) = mpsc::channel();
        self.send(Command::Sync { completion })?;
        rx.recv().unwrap_or(Err(WalError::Closed))
    }

    /// Highest LSN known to be on stable storage.
    pub fn durable_lsn(&self) -> Lsn {
        *self.state.durable.lock()
    }

    /// LSN of the last entry written, whether or not it is synced yet.
    pub fn last_written_lsn(&self) -> Lsn {
        *self.state.written.lock()
    }

    /// Bytes appended to the log since the last segment switch.
    pub fn bytes_since_switch(&self) -> u64 {
        self.state.bytes_since_switch.load(Ordering::Relaxed)
    }

    /// Drains queued appends, fsyncs, and joins the writer thread. Further
    /// appends fail with [`WalError::Closed`].
    pub fn shutdown(&self) -> Result<(), WalError> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // A full queue is fine: the writer is still draining it.
        let _ = self.tx.send(Command::Shutdown);
        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                return Err(WalError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "wal-writer thread panicked",
                )));
            }
        }
        info!(dir = %self.dir.display(), durable = %self.durable_lsn(), "disk logger stopped");
        Ok(())
    }

    fn send(&self, cmd: Command) -> Result<(), WalError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(WalError::Closed);
        }
        self.tx.send(cmd).map_err(|_| WalError::Closed)
    }
}

impl Drop for DiskLogger {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for DiskLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskLogger")
            .field("dir", &self.dir)
            .field("durability", &self.durability)
            .field("durable", &self.durable_lsn())
            .finish()
    }
}

/// State owned by the writer thread.
struct Writer {
    dir: PathBuf,
    segment: SegmentWriter,
    next_lsn: Lsn,
    last_written: Lsn,
    durability: Durability,
    state: Arc<SharedState>,
    /// Written but not yet synced entries waiting for their completion.
    pending: Vec<(Lsn, Completion)>,
    /// Written since the last fsync (pseudo-sync mode).
    dirty: bool,
}

impl Writer {
    fn run(&mut self, rx: Receiver<Command>) {
        let mut deadline: Option<Instant> = None;
        let mut shutdown = false;

        loop {
            if shutdown {
                // Drain whatever was queued before the shutdown request.
                while let Ok(cmd) = rx.try_recv() {
                    self.handle(cmd, &mut deadline, &mut shutdown);
                }
                self.flush();
                break;
            }

            let cmd = match deadline {
                Some(limit) => {
                    let now = Instant::now();
                    if now >= limit {
                        None
                    } else {
                        match rx.recv_timeout(limit - now) {
                            Ok(cmd) => Some(cmd),
                            Err(mpsc::RecvTimeoutError::Timeout) => None,
                            Err(mpsc::RecvTimeoutError::Disconnected) => {
                                shutdown = true;
                                None
                            }
                        }
                    }
                }
                None => match rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => {
                        shutdown = true;
                        None
                    }
                },
            };

            match cmd {
                Some(cmd) => self.handle(cmd, &mut deadline, &mut shutdown),
                None => {
                    if deadline.is_some_and(|limit| Instant::now() >= limit) {
                        self.flush();
                        deadline = None;
                    }
                }
            }
        }
        debug!(dir = %self.dir.display(), "wal-writer exiting");
    }

    fn handle(&mut self, cmd: Command, deadline: &mut Option<Instant>, shutdown: &mut bool) {
        match cmd {
            Command::Append {
                payload_type,
                payload,
                completion,
            } => self.append(payload_type, payload, completion, deadline),
            Command::Switch { completion } => {
                self.flush();
                *deadline = None;
                let result = self.switch();
                let _ = completion.send(result);
            }
            Command::Sync { completion } => {
                self.flush();
                *deadline = None;
                let result = match self.state.failure() {
                    Some(e) => Err(e),
                    None => Ok(*self.state.durable.lock()),
                };
                let _ = completion.send(result);
            }
            Command::Shutdown => *shutdown = true,
        }
    }

    fn append(
        &mut self,
        payload_type: PayloadType,
        payload: Vec<u8>,
        completion: Completion,
        deadline: &mut Option<Instant>,
    ) {
        if let Some(e) = self.state.failure() {
            let _ = completion.send(Err(e));
            return;
        }
        let entry = LogEntry {
            lsn: self.next_lsn,
            payload_type,
            payload,
        };
        if let Err(e) = self.segment.append(&entry) {
            error!(lsn = %entry.lsn, error = %e, "log append failed");
            let _ = completion.send(Err(self.fail(e)));
            return;
        }
        let lsn = entry.lsn;
        self.next_lsn = lsn.next();
        self.last_written = lsn;
        *self.state.written.lock() = lsn;
        self.state
            .bytes_since_switch
            .store(self.segment.len(), Ordering::Relaxed);

        match self.durability {
            Durability::SyncPerWrite => {
                self.pending.push((lsn, completion));
                self.flush();
            }
            Durability::Group { window, max_batch } => {
                self.pending.push((lsn, completion));
                if self.pending.len() >= max_batch {
                    self.flush();
                    *deadline = None;
                } else if deadline.is_none() {
                    *deadline = Some(Instant::now() + window);
                }
            }
            Durability::PseudoSync { window } => {
                // Acknowledged before fsync; the window sync makes it durable.
                let _ = completion.send(Ok(lsn));
                self.dirty = true;
                if deadline.is_none() {
                    *deadline = Some(Instant::now() + window);
                }
            }
        }
    }

    /// fsyncs if anything is unsynced and completes pending entries.
    fn flush(&mut self) {
        if self.pending.is_empty() && !self.dirty {
            return;
        }
        let result = match self.state.failure() {
            Some(e) => Err(e),
            None => self.segment.sync(),
        };
        match result {
            Ok(()) => {
                *self.state.durable.lock() = self.last_written;
                self.dirty = false;
                for (lsn, completion) in self.pending.drain(..) {
                    let _ = completion.send(Ok(lsn));
                }
            }
            Err(e) => {
                error!(error = %e, "log sync failed");
                self.fail(e);
                for (_, completion) in self.pending.drain(..) {
                    let err = self.state.failure().unwrap_or(WalError::Closed);
                    let _ = completion.send(Err(err));
                }
            }
        }
    }

    fn switch(&mut self) -> Result<Lsn, WalError> {
        if let Some(e) = self.state.failure() {
            return Err(e);
        }
        let closed = self.last_written;
        if self.segment.is_empty() {
            // Nothing was written to this segment; keep using it.
            return Ok(closed);
        }
        match SegmentWriter::open(&self.dir, self.next_lsn) {
            Ok(next) => {
                debug!(closed = %self.segment.path().display(), next = %self.next_lsn, "log segment switched");
                self.segment = next;
                self.state.bytes_since_switch.store(0, Ordering::Relaxed);
                Ok(closed)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Marks the log as failed and returns an error for the current caller.
    fn fail(&mut self, e: WalError) -> WalError {
        let repr = match &e {
            WalError::Io(io) => (io.kind(), io.to_string()),
            other => (io::ErrorKind::Other, other.to_string()),
        };
        self.state.failure.lock().get_or_insert(repr);
        self.state.failed.store(true, Ordering::Release);
        e
    }
}

/// Re-creates a recorded failure for another caller.
fn failure((kind, msg): &(io::ErrorKind, String)) -> WalError {
    WalError::Io(io::Error::new(*kind, msg.clone()))
}

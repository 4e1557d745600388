//! Sharded request pipeline.
//!
//! Every database is owned by one worker (`database_id % num_workers`), so
//! all modifications of a database are logged and applied in submission
//! order. Each worker drains its own queue:
//!
//! ```text
//! Insert:  validate → log append → wait for sync (unless pseudo-sync) → apply → reply
//! Lookup:  read the tree → reply
//! ```

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use wal::{DiskLogger, PayloadType};

use crate::database::LsmDatabase;
use crate::error::{EngineError, Result};
use crate::record::RecordGroup;

/// Completion of a submitted request.
#[must_use = "a request's result is only observable through wait()"]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    fn channel() -> (Sender<Result<T>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    /// Blocks until the request has completed.
    ///
    /// A request dropped by a stopping worker reports
    /// [`EngineError::ShuttingDown`].
    pub fn wait(self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(EngineError::ShuttingDown))
    }
}

type UserLookup = Box<dyn FnOnce(&LsmDatabase) + Send>;

pub(crate) enum Request {
    Insert {
        db: Arc<LsmDatabase>,
        group: RecordGroup,
        done: Sender<Result<()>>,
    },
    Lookup {
        db: Arc<LsmDatabase>,
        index: u32,
        key: Vec<u8>,
        done: Sender<Result<Option<Vec<u8>>>>,
    },
    PrefixLookup {
        db: Arc<LsmDatabase>,
        index: u32,
        prefix: Vec<u8>,
        ascending: bool,
        done: Sender<Result<Vec<(Vec<u8>, Vec<u8>)>>>,
    },
    /// Runs caller code on the worker that owns the database. The closure
    /// carries its own reply channel.
    UserDefinedLookup { db: Arc<LsmDatabase>, run: UserLookup },
}

impl Request {
    pub(crate) fn insert(db: Arc<LsmDatabase>, group: RecordGroup) -> (Self, Pending<()>) {
        let (done, pending) = Pending::channel();
        (Request::Insert { db, group, done }, pending)
    }

    pub(crate) fn lookup(db: Arc<LsmDatabase>, index: u32, key: Vec<u8>) -> (Self, Pending<Option<Vec<u8>>>) {
        let (done, pending) = Pending::channel();
        (Request::Lookup { db, index, key, done }, pending)
    }

    pub(crate) fn prefix_lookup(
        db: Arc<LsmDatabase>,
        index: u32,
        prefix: Vec<u8>,
        ascending: bool,
    ) -> (Self, Pending<Vec<(Vec<u8>, Vec<u8>)>>) {
        let (done, pending) = Pending::channel();
        let req = Request::PrefixLookup {
            db,
            index,
            prefix,
            ascending,
            done,
        };
        (req, pending)
    }

    pub(crate) fn user_defined<T, F>(db: Arc<LsmDatabase>, f: F) -> (Self, Pending<T>)
    where
        T: Send + 'static,
        F: FnOnce(&LsmDatabase) -> Result<T> + Send + 'static,
    {
        let (done, pending) = Pending::channel();
        let run: UserLookup = Box::new(move |db| {
            let _ = done.send(f(db));
        });
        (Request::UserDefinedLookup { db, run }, pending)
    }

    fn database_id(&self) -> u32 {
        match self {
            Request::Insert { db, .. }
            | Request::Lookup { db, .. }
            | Request::PrefixLookup { db, .. }
            | Request::UserDefinedLookup { db, .. } => db.id(),
        }
    }

    /// Completes the request with `err` without running it.
    fn fail(self, err: EngineError) {
        match self {
            Request::Insert { done, .. } => {
                let _ = done.send(Err(err));
            }
            Request::Lookup { done, .. } => {
                let _ = done.send(Err(err));
            }
            Request::PrefixLookup { done, .. } => {
                let _ = done.send(Err(err));
            }
            // dropping the closure drops its sender; the caller sees ShuttingDown
            Request::UserDefinedLookup { .. } => {}
        }
    }

    fn execute(self, ctx: &WorkerContext) {
        match self {
            Request::Insert { db, group, done } => {
                let result = ctx.insert(&db, group);
                if let Err(e) = &result {
                    debug!(database = db.id(), error = %e, "insert failed");
                }
                let _ = done.send(result);
            }
            Request::Lookup { db, index, key, done } => {
                let result = db.index(index).and_then(|tree| tree.lookup(&key, None));
                let _ = done.send(result);
            }
            Request::PrefixLookup {
                db,
                index,
                prefix,
                ascending,
                done,
            } => {
                let result = db
                    .index(index)
                    .and_then(|tree| tree.prefix_lookup(&prefix, ascending, None).collect());
                let _ = done.send(result);
            }
            Request::UserDefinedLookup { db, run } => run(&db),
        }
    }
}

/// State shared by all workers.
pub(crate) struct WorkerContext {
    pub(crate) logger: Arc<DiskLogger>,
    /// Read-held from log append until the group is applied; a checkpoint
    /// write-locks it to cut a consistent LSN.
    pub(crate) gate: Arc<RwLock<()>>,
}

impl WorkerContext {
    fn insert(&self, db: &LsmDatabase, group: RecordGroup) -> Result<()> {
        if group.database_id != db.id() {
            return Err(EngineError::InvalidArgument(format!(
                "record group for database {} routed to database {}",
                group.database_id,
                db.id()
            )));
        }
        // all-or-nothing: an unknown index rejects the group before it is logged
        db.validate(&group)?;

        let payload = group.encode();
        let _gate = self.gate.read();
        let handle = self.logger.append(PayloadType::Insert, payload)?;
        if !self.logger.durability().is_pseudo_sync() {
            handle.wait()?;
        }
        db.apply(group)
    }
}

enum Queue {
    Bounded(SyncSender<Request>),
    Unbounded(Sender<Request>),
}

impl Queue {
    fn send(&self, req: Request) -> std::result::Result<(), Request> {
        match self {
            Queue::Bounded(tx) => tx.send(req).map_err(|e| e.0),
            Queue::Unbounded(tx) => tx.send(req).map_err(|e| e.0),
        }
    }
}

/// Fixed set of worker threads, one queue each.
pub struct WorkerPool {
    queues: RwLock<Vec<Queue>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: Arc<AtomicBool>,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawns `num_workers` threads named `lsm-worker-<n>`.
    ///
    /// `queue_len` bounds each queue; 0 means unbounded.
    pub(crate) fn start(num_workers: usize, queue_len: usize, ctx: WorkerContext) -> Result<Self> {
        if num_workers == 0 {
            return Err(EngineError::InvalidArgument("num_workers must be at least 1".into()));
        }
        let ctx = Arc::new(ctx);
        let shutting_down = Arc::new(AtomicBool::new(false));
        let mut queues = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for n in 0..num_workers {
            let (queue, rx) = if queue_len == 0 {
                let (tx, rx) = mpsc::channel();
                (Queue::Unbounded(tx), rx)
            } else {
                let (tx, rx) = mpsc::sync_channel(queue_len);
                (Queue::Bounded(tx), rx)
            };
            let ctx = ctx.clone();
            let flag = shutting_down.clone();
            let handle = thread::Builder::new()
                .name(format!("lsm-worker-{n}"))
                .spawn(move || worker_loop(rx, &ctx, &flag))?;
            queues.push(queue);
            handles.push(handle);
        }

        info!(num_workers, queue_len, "worker pool started");
        Ok(Self {
            queues: RwLock::new(queues),
            handles: Mutex::new(handles),
            shutting_down,
            num_workers,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Routes a request to the worker owning its database. Blocks while that
    /// worker's queue is full.
    pub(crate) fn submit(&self, req: Request) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        let queues = self.queues.read();
        let Some(queue) = queues.get(req.database_id() as usize % self.num_workers) else {
            return Err(EngineError::ShuttingDown);
        };
        queue.send(req).map_err(|_| EngineError::ShuttingDown)
    }

    /// Stops accepting requests, fails the ones still queued, and joins the
    /// threads. A request already executing runs to completion.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // dropping the senders ends each worker once its queue is drained
        self.queues.write().clear();
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Request>, ctx: &WorkerContext, shutting_down: &AtomicBool) {
    while let Ok(req) = rx.recv() {
        if shutting_down.load(Ordering::SeqCst) {
            req.fail(EngineError::ShuttingDown);
            continue;
        }
        req.execute(ctx);
    }
}

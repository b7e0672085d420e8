//! Flush scheduling.
//!
//! A [`Flusher`] performs one flush: it encodes the table under the store's
//! read lock and writes the bytes to the [`DataFile`] after the lock is
//! released. The [`Scheduler`] decides when that happens:
//!
//! - [`FlushPolicy::Manual`]: only on request and at shutdown.
//! - [`FlushPolicy::WriteThrough`]: synchronously after every successful
//!   mutation, on the mutating caller's thread.
//! - [`FlushPolicy::Interval`]: on a background timer.
//!
//! Independently of the policy, [`SchedulerHandle::trigger`] queues a flush
//! on the background thread (used for operator signals), and
//! [`Scheduler::shutdown`] always attempts one final flush.
//!
//! Triggers may overlap. Flushes are serialized by the flusher, and each one
//! writes the state as of the moment it took the read lock, so the file never
//! goes back to an older state. Redundant flushes are not deduplicated.

use crate::codec::DataFile;
use crate::error::{Result, StoreError};
use crate::store::{MutationListener, Store};
use crossbeam_channel::{bounded, never, select, tick, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long shutdown waits for the background thread before giving up on it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// When flushes run, besides explicit requests and shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Never on its own.
    Manual,
    /// After every successful create, update or delete.
    WriteThrough,
    /// Every fixed period.
    Interval(Duration),
}

impl FlushPolicy {
    /// Map the operator-facing number of seconds to a policy.
    ///
    /// `-1` is manual, `0` is write-through and any positive value is an
    /// interval in seconds. Other negative values are rejected.
    pub fn from_seconds(seconds: i64) -> Result<Self> {
        match seconds {
            -1 => Ok(FlushPolicy::Manual),
            0 => Ok(FlushPolicy::WriteThrough),
            n if n > 0 => Ok(FlushPolicy::Interval(Duration::from_secs(n as u64))),
            n => Err(StoreError::InvalidConfig(format!(
                "flush interval must be -1, 0 or positive, got {}",
                n
            ))),
        }
    }
}

impl fmt::Display for FlushPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushPolicy::Manual => write!(f, "manual"),
            FlushPolicy::WriteThrough => write!(f, "write-through"),
            FlushPolicy::Interval(d) => write!(f, "interval({}s)", d.as_secs()),
        }
    }
}

/// Outcome of one successful flush.
#[derive(Clone, Copy, Debug)]
pub struct FlushStats {
    pub users: usize,
    pub bytes: usize,
    pub elapsed: Duration,
}

/// Writes the store's current state to its data file.
pub struct Flusher {
    file: DataFile,
    /// Serializes flushes so a slower, older snapshot never overwrites a
    /// newer one.
    write_lock: Mutex<()>,
}

impl Flusher {
    pub fn new(file: DataFile) -> Self {
        Self {
            file,
            write_lock: Mutex::new(()),
        }
    }

    pub fn file(&self) -> &DataFile {
        &self.file
    }

    /// Run one flush of `store`.
    ///
    /// Mutations are blocked only while the table is being encoded.
    pub fn flush(&self, store: &Store) -> Result<FlushStats> {
        let _guard = self.write_lock.lock();
        let start = Instant::now();

        let (bytes, users) = store
            .with_table(|table| {
                self.file
                    .codec()
                    .encode(table)
                    .map(|bytes| (bytes, table.users.len()))
            })
            .map_err(|e| StoreError::Save {
                path: self.file.path().to_path_buf(),
                reason: e.to_string(),
            })?;

        self.file.write(&bytes)?;

        let stats = FlushStats {
            users,
            bytes: bytes.len(),
            elapsed: start.elapsed(),
        };
        debug!(
            path = %self.file.path().display(),
            users = stats.users,
            bytes = stats.bytes,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "flushed"
        );
        Ok(stats)
    }

    /// Flush and log the outcome. Used where no caller waits for the result.
    fn flush_logged(&self, store: &Store, reason: &'static str) {
        match self.flush(store) {
            Ok(stats) => info!(reason, users = stats.users, bytes = stats.bytes, "flush complete"),
            Err(e) => error!(reason, error = %e, "flush failed"),
        }
    }
}

impl MutationListener for Flusher {
    fn mutated(&self, store: &Store) {
        // The mutation is already applied in memory; a failed write is
        // reported here and retried by the next flush.
        if let Err(e) = self.flush(store) {
            warn!(error = %e, "write-through flush failed");
        }
    }
}

enum Command {
    Flush,
    Stop,
}

/// Cheap handle for requesting flushes from anywhere.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: Sender<Command>,
    store: Arc<Store>,
    flusher: Arc<Flusher>,
}

impl SchedulerHandle {
    /// Queue a flush on the background thread and return immediately.
    pub fn trigger(&self) -> Result<()> {
        self.commands
            .send(Command::Flush)
            .map_err(|_| StoreError::SchedulerStopped)
    }

    /// Flush on the calling thread and return the result.
    pub fn flush_now(&self) -> Result<FlushStats> {
        self.flusher.flush(&self.store)
    }
}

/// Owns the background flush thread.
///
/// Dropping a scheduler that was not shut down explicitly shuts it down,
/// including the final flush.
pub struct Scheduler {
    policy: FlushPolicy,
    handle: SchedulerHandle,
    worker: Option<JoinHandle<()>>,
    done: Receiver<()>,
    stopped: bool,
}

impl Scheduler {
    /// Start flushing `store` into `file` according to `policy`.
    pub fn start(store: Arc<Store>, file: DataFile, policy: FlushPolicy) -> Result<Self> {
        let flusher = Arc::new(Flusher::new(file));
        let (commands, receiver) = unbounded();
        let (done_tx, done) = bounded(1);

        let ticker = match policy {
            FlushPolicy::Interval(period) => tick(period),
            FlushPolicy::Manual | FlushPolicy::WriteThrough => never(),
        };

        let worker = {
            let store = Arc::clone(&store);
            let flusher = Arc::clone(&flusher);
            thread::Builder::new()
                .name("userdb-flush".to_string())
                .spawn(move || {
                    run_worker(&store, &flusher, receiver, ticker);
                    let _ = done_tx.send(());
                })?
        };

        if policy == FlushPolicy::WriteThrough {
            store.set_listener(flusher.clone());
        }

        info!(policy = %policy, path = %flusher.file().path().display(), "flush scheduler started");

        Ok(Self {
            policy,
            handle: SchedulerHandle {
                commands,
                store,
                flusher,
            },
            worker: Some(worker),
            done,
            stopped: false,
        })
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop background flushing and write the final state once.
    ///
    /// The final flush is not retried; its error is returned for the caller
    /// to log. Once it has run, further calls return
    /// [`StoreError::SchedulerStopped`] without flushing again.
    pub fn shutdown(&mut self) -> Result<FlushStats> {
        if self.stopped {
            return Err(StoreError::SchedulerStopped);
        }
        self.stopped = true;

        if self.policy == FlushPolicy::WriteThrough {
            self.handle.store.clear_listener();
        }

        let _ = self.handle.commands.send(Command::Stop);
        match self.done.recv_timeout(SHUTDOWN_GRACE) {
            Ok(()) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
            }
            Err(_) => warn!("flush thread did not stop in time, abandoning it"),
        }

        let result = self.handle.flush_now();
        match &result {
            Ok(stats) => info!(users = stats.users, bytes = stats.bytes, "final flush complete"),
            Err(e) => error!(error = %e, "final flush failed"),
        }
        info!("flush scheduler stopped");
        result
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.shutdown();
        }
    }
}

fn run_worker(store: &Store, flusher: &Flusher, commands: Receiver<Command>, ticker: Receiver<Instant>) {
    loop {
        select! {
            recv(commands) -> command => match command {
                Ok(Command::Flush) => flusher.flush_logged(store, "requested"),
                Ok(Command::Stop) | Err(_) => break,
            },
            recv(ticker) -> _ => flusher.flush_logged(store, "interval"),
        }
    }
    debug!("flush thread exiting");
}

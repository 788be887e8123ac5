//! # Dedicated threads for synchronous user functions.
//!
//! Each runner owns one [`SyncPool`]. Threads are plain `std` threads named
//! `conductor-sync-<task_type>-<n>`, started lazily until the pool reaches the
//! runner's current `thread_count`, and fed from a shared job queue.
//!
//! ```text
//! dispatch ──► submit(limit, job) ──► queue ──► idle thread ──► job() ──► oneshot ──► reap
//!                  └─ spawned < limit → start one more thread
//! ```
//!
//! Threads are detached: nothing ever joins them. A function that never returns
//! keeps its thread, but it does not keep the runner's tokio runtime alive the
//! way `spawn_blocking` work would. Idle threads exit once the pool is dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::executor::ExecutionHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct SyncPool {
    name: Arc<str>,
    tx: Sender<Job>,
    rx: Arc<Mutex<Receiver<Job>>>,
    spawned: usize,
}

impl SyncPool {
    pub(crate) fn new(task_type: &str) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            name: Arc::from(task_type),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            spawned: 0,
        }
    }

    /// Number of threads started so far.
    pub(crate) fn threads(&self) -> usize {
        self.spawned
    }

    /// Queues `f` on the pool, growing it to at most `limit` threads.
    ///
    /// `done` is notified after the result is sent. A panic in `f` reads as
    /// [`ExecutorError::Panicked`].
    pub(crate) fn submit<T, F>(
        &mut self,
        limit: usize,
        f: F,
        done: Arc<Notify>,
    ) -> Result<ExecutionHandle<T>, ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.spawned < limit.max(1) {
            self.spawn()?;
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let res = catch_unwind(AssertUnwindSafe(f))
                .map_err(|_| ExecutorError::Panicked("synchronous function panicked".into()));
            let _ = tx.send(res);
            done.notify_one();
        });
        self.tx
            .send(job)
            .map_err(|_| ExecutorError::Runtime("sync pool queue closed".into()))?;
        Ok(ExecutionHandle::detached(rx))
    }

    fn spawn(&mut self) -> Result<(), ExecutorError> {
        let n = self.spawned;
        let rx = Arc::clone(&self.rx);
        std::thread::Builder::new()
            .name(format!("conductor-sync-{}-{n}", self.name))
            .spawn(move || loop {
                let job = match rx.lock() {
                    Ok(guard) => guard.recv(),
                    Err(poisoned) => poisoned.into_inner().recv(),
                };
                match job {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            })
            .map_err(|e| {
                warn!(task_type = %self.name, error = %e, "failed to start sync thread");
                ExecutorError::Runtime(format!("failed to start sync thread: {e}"))
            })?;
        self.spawned += 1;
        debug!(task_type = %self.name, threads = self.spawned, "sync pool grew");
        Ok(())
    }
}

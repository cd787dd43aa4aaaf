//! Rebuildable worker pools and task handles.

use crate::{Error, Result};
use log::{debug, error};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

/// A bounded rayon pool that can be torn down and built again.
///
/// Work still queued in a discarded pool runs to completion on its own
/// threads, but its results go nowhere: the receivers of its
/// [`TaskHandle`]s have been dropped along with the callers.
pub struct WorkerPool {
    label: String,
    threads: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl WorkerPool {
    /// Build a pool. `threads == 0` lets rayon pick one thread per CPU.
    pub fn new(label: impl Into<String>, threads: usize) -> Result<Self> {
        let mut pool = Self {
            label: label.into(),
            threads,
            pool: None,
        };
        pool.recreate()?;
        Ok(pool)
    }

    /// Pool name, used for thread names and logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the pool can currently accept work.
    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    /// Number of worker threads, if running.
    pub fn current_num_threads(&self) -> Option<usize> {
        self.pool.as_ref().map(|p| p.current_num_threads())
    }

    /// Discard the pool. Pending tasks are abandoned.
    pub fn shutdown(&mut self) {
        if self.pool.take().is_some() {
            debug!("Worker pool '{}' shut down", self.label);
        }
    }

    /// Discard the current pool, if any, and build a fresh one.
    pub fn recreate(&mut self) -> Result<()> {
        self.shutdown();
        let label = self.label.clone();
        let panic_label = self.label.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(move |i| format!("{}-{}", label, i))
            .panic_handler(move |_| {
                error!("A task in worker pool '{}' panicked", panic_label);
            })
            .build()
            .map_err(|e| Error::Pool(format!("{}: {}", self.label, e)))?;
        debug!(
            "Worker pool '{}' started with {} threads",
            self.label,
            pool.current_num_threads()
        );
        self.pool = Some(Arc::new(pool));
        Ok(())
    }

    /// Shared handle to the running pool.
    pub(crate) fn handle(&self) -> Result<Arc<ThreadPool>> {
        self.pool
            .clone()
            .ok_or_else(|| Error::Pool(format!("{} is shut down", self.label)))
    }
}

/// Run `task` on `pool`, returning a handle to its eventual result.
pub(crate) fn spawn<T, F>(pool: &ThreadPool, task: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    pool.spawn(move || {
        // The receiver is gone if the caller was abandoned.
        let _ = tx.send(task());
    });
    TaskHandle { rx }
}

/// The pending result of a task dispatched to a [`WorkerPool`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task delivers its result.
    ///
    /// Fails if the task panicked or its pool was discarded before it ran.
    pub fn join(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| Error::Pool("task ended without delivering a result".into()))
    }

    /// A handle that is already resolved.
    pub fn ready(value: T) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        let _ = tx.send(value);
        Self { rx }
    }
}

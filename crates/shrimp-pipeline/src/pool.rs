//! Background execution on a bounded pool of worker threads.
//!
//! A [`WorkerPool`] is created explicitly and owned by the caller; there is
//! no process-wide pool. Tasks are plain blocking closures (typically ones
//! that build and close a pipeline) and run on the blocking threads of a
//! private tokio runtime, at most `threads` at a time.
//!
//! ```no_run
//! use std::time::Duration;
//! use shrimp_pipeline::{WorkerPool, pipe};
//!
//! let pool = WorkerPool::new(4).unwrap();
//! let task = pool.submit(|| pipe(["echo hello"]));
//! let result = task.wait().unwrap().unwrap();
//! assert_eq!(result.stdout.as_deref(), Some("hello\n"));
//! pool.shutdown(Duration::from_secs(1));
//! ```

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{JoinError, JoinHandle};

use crate::config::ShrimpConfig;
use crate::stream::panic_message;

/// Errors from the worker pool and its tasks.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(#[source] io::Error),

    #[error("background task panicked: {0}")]
    Panicked(String),

    #[error("background task was cancelled")]
    Cancelled,

    #[error("background task did not finish within {0:?}")]
    Timeout(Duration),

    #[error("background task result was already taken")]
    AlreadyJoined,
}

impl From<JoinError> for PoolError {
    fn from(e: JoinError) -> Self {
        if e.is_panic() {
            PoolError::Panicked(panic_message(&*e.into_panic()))
        } else {
            PoolError::Cancelled
        }
    }
}

/// Unique identifier for a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bounded pool of worker threads.
pub struct WorkerPool {
    runtime: Runtime,
    threads: usize,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Create a pool running at most `threads` tasks at once.
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("shrimp-worker")
            .enable_time()
            .build()
            .map_err(PoolError::Build)?;

        tracing::debug!(threads, "worker pool started");
        Ok(Self {
            runtime,
            threads,
            next_id: AtomicU64::new(1),
        })
    }

    /// Create a pool sized by `worker_threads`.
    pub fn from_config(config: &ShrimpConfig) -> Result<Self, PoolError> {
        Self::new(config.worker_threads)
    }

    /// Maximum number of tasks running at once.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `task` in the background.
    ///
    /// Tasks beyond the thread limit queue until a worker is free.
    pub fn submit<F, T>(&self, task: F) -> BackgroundTask<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::trace!(%id, "task submitted");

        BackgroundTask {
            id,
            handle: Some(self.runtime.spawn_blocking(task)),
            runtime: self.runtime.handle().clone(),
        }
    }

    /// Stop the pool, waiting up to `timeout` for running tasks.
    ///
    /// Tasks still running after the timeout are left to finish on their own.
    pub fn shutdown(self, timeout: Duration) {
        tracing::debug!(threads = self.threads, "worker pool shutting down");
        self.runtime.shutdown_timeout(timeout);
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

/// Handle to a task submitted to a [`WorkerPool`].
///
/// The wait methods block the calling thread and must not be called from
/// inside an async runtime.
pub struct BackgroundTask<T> {
    id: TaskId,
    handle: Option<JoinHandle<T>>,
    runtime: Handle,
}

impl<T> BackgroundTask<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True once the task has finished and its result can be taken.
    pub fn is_ready(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_finished())
    }

    /// Block until the task finishes and return its value.
    pub fn wait(mut self) -> Result<T, PoolError> {
        let handle = self.handle.take().ok_or(PoolError::AlreadyJoined)?;
        Ok(self.runtime.block_on(handle)?)
    }

    /// Block for at most `timeout`.
    ///
    /// On timeout the task keeps running and can be waited for again.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<T, PoolError> {
        let handle = self.handle.as_mut().ok_or(PoolError::AlreadyJoined)?;
        let joined = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, handle).await });

        match joined {
            Ok(result) => {
                self.handle = None;
                Ok(result?)
            }
            Err(_) => Err(PoolError::Timeout(timeout)),
        }
    }
}

impl<T> std::fmt::Debug for BackgroundTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("id", &self.id)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn submit_and_wait() {
        let pool = WorkerPool::new(2).unwrap();
        let task = pool.submit(|| 6 * 7);
        assert_eq!(task.wait().unwrap(), 42);
    }

    #[test]
    fn task_ids_are_unique() {
        let pool = WorkerPool::new(1).unwrap();
        let a = pool.submit(|| ());
        let b = pool.submit(|| ());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn panic_is_reported() {
        let pool = WorkerPool::new(1).unwrap();
        let task = pool.submit(|| -> u32 { panic!("worker exploded") });
        match task.wait() {
            Err(PoolError::Panicked(msg)) => assert!(msg.contains("worker exploded")),
            other => panic!("expected panic error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn wait_timeout_then_wait_again() {
        let pool = WorkerPool::new(1).unwrap();
        let mut task = pool.submit(|| {
            thread::sleep(Duration::from_millis(300));
            "late"
        });

        assert!(matches!(
            task.wait_timeout(Duration::from_millis(10)),
            Err(PoolError::Timeout(_))
        ));
        assert!(!task.is_ready());
        assert_eq!(task.wait_timeout(Duration::from_secs(10)).unwrap(), "late");
        assert!(matches!(
            task.wait_timeout(Duration::from_secs(1)),
            Err(PoolError::AlreadyJoined)
        ));
    }

    #[test]
    fn concurrency_is_bounded() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.wait().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn is_ready_after_completion() {
        let pool = WorkerPool::new(1).unwrap();
        let task = pool.submit(|| 1);
        while !task.is_ready() {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(task.wait().unwrap(), 1);
    }

    #[test]
    fn shutdown_returns() {
        let pool = WorkerPool::from_config(&ShrimpConfig::default()).unwrap();
        assert_eq!(pool.threads(), 10);
        pool.shutdown(Duration::from_millis(100));
    }
}

//! Bounded worker pool.
//!
//! The `WorkerPool` runs a batch of independent tasks with at most
//! `pool_size` in flight. Every attempt is time boxed and runs in its own
//! tokio task, so a panicking worker fails only the task it was running.
//! Status changes are emitted as [`PoolEvent`]s when a channel is attached.

use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use crate::core::task::{Task, WorkerResult};
use crate::error::{Error, Result, TaskError};
use crate::orchestration::worker::Worker;

/// Upper bound on the default pool size.
pub const MAX_POOL_SIZE: usize = 8;

/// `min(available_parallelism, MAX_POOL_SIZE)`.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_POOL_SIZE)
}

/// Events emitted by the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// An attempt was dispatched to the worker.
    TaskStarted {
        /// The task being attempted.
        id: String,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// An attempt failed; a retry may follow.
    AttemptFailed {
        id: String,
        attempt: u32,
        error: TaskError,
    },
    /// The task reached its final outcome.
    TaskFinished {
        id: String,
        attempts: u32,
        success: bool,
    },
}

/// Point-in-time view of pool capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_workers: usize,
    pub pool_size: usize,
    pub active_workers: usize,
    pub available_workers: usize,
}

/// Shared state cloned into every task runner.
#[derive(Clone)]
struct Runner {
    worker: Arc<dyn Worker>,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    event_tx: Option<mpsc::Sender<PoolEvent>>,
}

/// Decrements the active count when a task releases its slot.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Runner {
    fn emit(&self, event: PoolEvent) {
        if let Some(tx) = &self.event_tx {
            // A slow or absent listener never stalls execution
            let _ = tx.try_send(event);
        }
    }

    /// Drive one task through its attempts.
    async fn run(self, task: Task) -> WorkerResult {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return self.finish(&task.id, 0, Err(TaskError::Cancelled));
        };
        self.active.fetch_add(1, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.active));

        let max_attempts = task.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.emit(PoolEvent::TaskStarted {
                id: task.id.clone(),
                attempt,
            });

            match self.attempt(&task).await {
                Ok(value) => return self.finish(&task.id, attempt, Ok(value)),
                Err(TaskError::Cancelled) => {
                    return self.finish(&task.id, attempt, Err(TaskError::Cancelled));
                }
                Err(error) => {
                    warn!(task = %task.id, attempt, max_attempts, %error, "attempt failed");
                    self.emit(PoolEvent::AttemptFailed {
                        id: task.id.clone(),
                        attempt,
                        error: error.clone(),
                    });
                    if attempt >= max_attempts {
                        return self.finish(&task.id, attempt, Err(error));
                    }
                }
            }
        }
    }

    /// One time-boxed attempt in its own tokio task.
    async fn attempt(&self, task: &Task) -> std::result::Result<Value, TaskError> {
        let worker = Arc::clone(&self.worker);
        let payload = task.payload.clone();
        let mut handle = tokio::spawn(async move { worker.execute(payload).await });
        let abort = handle.abort_handle();

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                abort.abort();
                Err(TaskError::Cancelled)
            }
            outcome = tokio::time::timeout(task.timeout, &mut handle) => match outcome {
                Err(_) => {
                    abort.abort();
                    // Hold the permit until the attempt is gone so a retry
                    // never overlaps it
                    let _ = (&mut handle).await;
                    Err(TaskError::Timeout(task.timeout))
                }
                Ok(Err(join)) if join.is_panic() => {
                    Err(TaskError::Panicked(panic_message(join.into_panic())))
                }
                Ok(Err(_)) => Err(TaskError::Cancelled),
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(message))) => Err(TaskError::Failed(message)),
            }
        }
    }

    fn finish(
        &self,
        id: &str,
        attempts: u32,
        result: std::result::Result<Value, TaskError>,
    ) -> WorkerResult {
        self.emit(PoolEvent::TaskFinished {
            id: id.to_string(),
            attempts,
            success: result.is_ok(),
        });
        debug!(task = id, attempts, success = result.is_ok(), "task finished");
        WorkerResult {
            id: id.to_string(),
            attempts,
            result,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs tasks on a fixed number of concurrent slots.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use wavegen::orchestration::{FnWorker, WorkerPool};
///
/// let worker = Arc::new(FnWorker::new(|p| async move { Ok(p.unit.name.into()) }));
/// let pool = WorkerPool::with_size(worker, 4);
/// let results = pool.execute_tasks(tasks).await?;
/// assert_eq!(results.len(), tasks_len);
/// ```
pub struct WorkerPool {
    worker: Arc<dyn Worker>,
    pool_size: usize,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    event_tx: Option<mpsc::Sender<PoolEvent>>,
}

impl WorkerPool {
    /// Pool sized by [`default_pool_size`].
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self::with_size(worker, default_pool_size())
    }

    /// Pool with an explicit size, at least 1.
    pub fn with_size(worker: Arc<dyn Worker>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            worker,
            pool_size,
            permits: Arc::new(Semaphore::new(pool_size)),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// Emit [`PoolEvent`]s on `tx`. Events are dropped when the channel is full.
    pub fn with_events(mut self, tx: mpsc::Sender<PoolEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run every task to completion or exhaustion.
    ///
    /// Results come back in input order, one per task. Task failures are
    /// carried in the results; only a destroyed pool is an error.
    pub async fn execute_tasks(&self, tasks: Vec<Task>) -> Result<Vec<WorkerResult>> {
        if self.shutdown.is_cancelled() {
            return Err(Error::PoolFailure("worker pool destroyed".to_string()));
        }
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        debug!(tasks = tasks.len(), pool_size = self.pool_size, "execute_tasks");

        let runner = Runner {
            worker: Arc::clone(&self.worker),
            permits: Arc::clone(&self.permits),
            active: Arc::clone(&self.active),
            shutdown: self.shutdown.clone(),
            event_tx: self.event_tx.clone(),
        };

        let (ids, handles): (Vec<String>, Vec<_>) = tasks
            .into_iter()
            .map(|task| (task.id.clone(), tokio::spawn(runner.clone().run(task))))
            .unzip();

        let joined = futures::future::join_all(handles).await;
        let results = ids
            .into_iter()
            .zip(joined)
            .map(|(id, joined)| match joined {
                Ok(result) => result,
                Err(e) => WorkerResult::failure(&id, 0, TaskError::Panicked(e.to_string())),
            })
            .collect();
        Ok(results)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.pool_size,
            pool_size: self.pool_size,
            active_workers: self.active.load(Ordering::SeqCst),
            available_workers: self.permits.available_permits(),
        }
    }

    pub fn health_check(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.permits.is_closed() && self.worker.is_healthy()
    }

    /// Cancel in-flight attempts and refuse further work.
    pub fn destroy(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.permits.close();
        info!(pool_size = self.pool_size, "worker pool destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_size", &self.pool_size)
            .field("active", &self.active.load(Ordering::SeqCst))
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

//! Concurrency-bounded worker pool executing queued tasks.
//!
//! One claim loop runs as a tokio task. It acquires one of `N` semaphore
//! permits, claims the next record from the [`TaskQueue`], and spawns the
//! execution while still holding the permit, so at most `N` bodies run at any
//! time. Async bodies run as spawned tokio tasks; blocking bodies run on
//! tokio's blocking pool.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use prometheus_task_queue::config::WorkerPoolConfig;
//! use prometheus_task_queue::core::WorkerPool;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new().with_concurrency(4), queue, registry)?;
//! pool.start();
//! // ...
//! let drained = pool.shutdown(Duration::from_secs(30)).await;
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::{
    FunctionRegistry, QueueError, RetryPolicy, TaskFailure, TaskFunction, TaskQueue, TaskRecord,
};
use crate::util::serde::TaskId;

/// Statistics about pool utilization since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Execution slots.
    pub concurrency: usize,
    /// Bodies executing right now.
    pub active_tasks: u64,
    /// Records claimed from the queue.
    pub claimed_tasks: u64,
    /// Attempts that completed successfully.
    pub completed_tasks: u64,
    /// Tasks that failed permanently.
    pub failed_tasks: u64,
    /// Failed attempts that were scheduled for retry.
    pub retried_tasks: u64,
    /// Attempts that exceeded their timeout.
    pub timed_out_tasks: u64,
}

/// Internal counters for pool statistics.
#[derive(Debug, Default)]
struct PoolCounters {
    active_tasks: AtomicU64,
    claimed_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    retried_tasks: AtomicU64,
    timed_out_tasks: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, concurrency: usize) -> PoolStats {
        PoolStats {
            concurrency,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            claimed_tasks: self.claimed_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            retried_tasks: self.retried_tasks.load(Ordering::Relaxed),
            timed_out_tasks: self.timed_out_tasks.load(Ordering::Relaxed),
        }
    }
}

/// State shared by the claim loop, executions and retry timers.
struct Shared {
    queue: Arc<TaskQueue>,
    registry: Arc<FunctionRegistry>,
    retry: RetryPolicy,
    counters: PoolCounters,
    shutdown: watch::Receiver<bool>,
}

/// Executes claimed tasks with at most `concurrency` running at once.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    claim_loop: parking_lot::Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl WorkerPool {
    /// Create a pool over `queue`. Nothing runs until [`WorkerPool::start`].
    ///
    /// # Errors
    ///
    /// `QueueError::Validation` if the configuration is invalid.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<TaskQueue>,
        registry: Arc<FunctionRegistry>,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::Validation)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.concurrency)),
            shared: Arc::new(Shared {
                queue,
                registry,
                retry: config.retry_policy(),
                counters: PoolCounters::default(),
                shutdown: shutdown_rx,
            }),
            shutdown_tx,
            claim_loop: parking_lot::Mutex::new(None),
            running: AtomicBool::new(false),
            config,
        })
    }

    /// Spawn the claim loop on the current tokio runtime. Calling it again while
    /// running, or after shutdown, does nothing.
    pub fn start(&self) {
        if *self.shutdown_tx.borrow() {
            warn!("worker pool already shut down; start ignored");
            return;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = tokio::spawn(claim_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.permits),
            self.config.poll_interval(),
        ));
        *self.claim_loop.lock() = Some(handle);
        info!(
            concurrency = self.config.concurrency,
            backoff_base_ms = self.config.backoff_base_ms,
            "worker pool started"
        );
    }

    /// Stop claiming new work, then wait up to `grace` for in-flight executions.
    ///
    /// Returns `true` when every execution finished within `grace`. Pending
    /// retry timers are dropped; their records stay `Retrying` and are promoted
    /// by the next `dequeue` once due.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown_tx.send_replace(true);
        let handle = self.claim_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "claim loop ended abnormally");
            }
        }
        self.running.store(false, Ordering::Release);

        let slots = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        let drained = match tokio::time::timeout(grace, self.permits.acquire_many(slots)).await {
            Ok(Ok(permits)) => {
                drop(permits);
                true
            }
            Ok(Err(_)) => true,
            Err(_) => false,
        };

        let stats = self.stats();
        if drained {
            info!(
                completed = stats.completed_tasks,
                failed = stats.failed_tasks,
                "worker pool shut down"
            );
        } else {
            warn!(
                active = stats.active_tasks,
                grace_secs = grace.as_secs_f64(),
                "worker pool shut down with executions still in flight"
            );
        }
        drained
    }

    /// Snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(self.config.concurrency)
    }

    /// Whether the claim loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Stop claiming; in-flight executions finish on their own.
        if !self.shutdown_tx.send_replace(true) && self.is_running() {
            debug!("worker pool dropped without explicit shutdown");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn claim_loop(shared: Arc<Shared>, permits: Arc<Semaphore>, poll_interval: Duration) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match shared.queue.dequeue().await {
            Ok(Some(record)) => {
                shared.counters.claimed_tasks.fetch_add(1, Ordering::Relaxed);
                debug!(
                    task_id = %record.id,
                    name = %record.name,
                    attempt = record.attempt,
                    "dispatching task"
                );
                tokio::spawn(execute(Arc::clone(&shared), record, permit));
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = shared.queue.wait_for_work(poll_interval) => {}
                }
            }
            Err(err) => {
                drop(permit);
                error!(error = %err, "claiming next task failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!("claim loop stopped");
}

/// Runs one claimed record; the permit is held until its outcome is recorded.
async fn execute(shared: Arc<Shared>, record: TaskRecord, _permit: OwnedSemaphorePermit) {
    let counters = &shared.counters;
    counters.active_tasks.fetch_add(1, Ordering::Relaxed);

    let outcome = match shared.registry.get(&record.callable_ref) {
        Some(function) => {
            let limit = record.timeout_seconds.map(Duration::from_secs);
            invoke(function, record.args.clone(), limit).await
        }
        None => Err(TaskFailure::execution(format!(
            "callable_ref `{}` is not registered",
            record.callable_ref
        ))),
    };

    counters.active_tasks.fetch_sub(1, Ordering::Relaxed);

    let id = record.id;
    let outcome = match outcome {
        Ok(value) => Outcome::Completed(value),
        Err(failure) => {
            if failure.is_timeout() {
                counters.timed_out_tasks.fetch_add(1, Ordering::Relaxed);
                warn!(task_id = %id, attempt = record.attempt, "task timed out");
            }
            let retryable =
                record.has_retries_left() && shared.registry.contains(&record.callable_ref);
            if retryable {
                let delay = shared.retry.next_delay(record.attempt);
                warn!(
                    task_id = %id,
                    attempt = record.attempt,
                    max_retries = record.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %failure.message,
                    "task attempt failed, retrying"
                );
                Outcome::Retry { failure, delay }
            } else {
                Outcome::Failed(failure)
            }
        }
    };

    if !record_outcome(&shared, id, &outcome).await {
        return;
    }
    match outcome {
        Outcome::Completed(_) => {
            counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
        }
        Outcome::Failed(_) => {
            counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }
        Outcome::Retry { delay, .. } => {
            counters.retried_tasks.fetch_add(1, Ordering::Relaxed);
            requeue_after(&shared, id, delay);
        }
    }
}

/// What a finished attempt turns into.
enum Outcome {
    Completed(Value),
    Failed(TaskFailure),
    Retry { failure: TaskFailure, delay: Duration },
}

/// Backoff between attempts to persist an outcome while the store is failing.
const OUTCOME_WRITE_BACKOFF: RetryPolicy = RetryPolicy {
    base_delay: Duration::from_millis(50),
    multiplier: 2.0,
    max_delay: Duration::from_secs(5),
};

/// Persist `outcome`, retrying while the store reports `Persistence` errors.
///
/// Returns `false` if the outcome was not recorded: a non-retryable error, or
/// shutdown requested while the store was still failing. The record then stays
/// `Running` and is re-admitted on the next start.
async fn record_outcome(shared: &Shared, id: TaskId, outcome: &Outcome) -> bool {
    let mut shutdown = shared.shutdown.clone();
    let mut failures = 0_u32;
    loop {
        let written = match outcome {
            Outcome::Completed(value) => shared.queue.complete(id, value.clone()).await,
            Outcome::Failed(failure) => shared.queue.fail(id, failure.clone()).await,
            Outcome::Retry { failure, delay } => {
                shared.queue.schedule_retry(id, failure.clone(), *delay).await
            }
        };
        let err = match written {
            Ok(_) => return true,
            Err(err @ QueueError::Persistence(_)) => err,
            Err(err) => {
                error!(task_id = %id, error = %err, "recording task outcome failed");
                return false;
            }
        };

        failures = failures.saturating_add(1);
        let delay = OUTCOME_WRITE_BACKOFF.next_delay(failures);
        warn!(
            task_id = %id,
            failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "recording task outcome failed, will try again"
        );
        if *shutdown.borrow() {
            error!(task_id = %id, "shutdown requested, task outcome not recorded");
            return false;
        }
        tokio::select! {
            _ = shutdown.changed() => {
                error!(task_id = %id, "shutdown requested, task outcome not recorded");
                return false;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Move a `Retrying` record back to `Pending` once `delay` has elapsed.
fn requeue_after(shared: &Arc<Shared>, id: TaskId, delay: Duration) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let mut shutdown = shared.shutdown.clone();
        tokio::select! {
            _ = shutdown.changed() => return,
            () = tokio::time::sleep(delay) => {}
        }
        match shared.queue.requeue(id).await {
            Ok(_) => debug!(task_id = %id, "retry requeued"),
            // Already promoted by a dequeue that found it due.
            Err(err) if err.is_invalid_transition() => {}
            Err(err) => error!(task_id = %id, error = %err, "requeueing retry failed"),
        }
    });
}

/// Run one attempt of `function`, classifying errors, panics and timeouts.
async fn invoke(
    function: Arc<dyn TaskFunction>,
    args: Value,
    limit: Option<Duration>,
) -> Result<Value, TaskFailure> {
    let handle = if function.is_blocking() {
        let runtime = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || runtime.block_on(function.call(args)))
    } else {
        tokio::spawn(async move { function.call(args).await })
    };

    let joined = match limit {
        Some(limit) => {
            let abort = handle.abort_handle();
            if let Ok(joined) = tokio::time::timeout(limit, handle).await {
                joined
            } else {
                // Blocking bodies cannot be interrupted and keep running detached.
                abort.abort();
                return Err(TaskFailure::timeout(limit));
            }
        }
        None => handle.await,
    };

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::execution(format!("{err:#}"))),
        Err(err) if err.is_panic() => Err(TaskFailure::execution(format!(
            "task panicked: {}",
            panic_message(&*err.into_panic())
        ))),
        Err(err) => Err(TaskFailure::execution(err.to_string())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

//! Build a complete task system from [`CoreConfig`].

use std::sync::Arc;

use tracing::info;

use crate::config::CoreConfig;
use crate::core::{
    EventSink, FunctionRegistry, QueueError, Scheduler, TaskQueue, TracingEventSink, WorkerPool,
};
use crate::infra::{InMemoryStore, JsonFileStore, TaskStore};

/// Queue, worker pool and scheduler sharing one store and registry.
#[derive(Debug)]
pub struct TaskSystem {
    config: CoreConfig,
    queue: Arc<TaskQueue>,
    workers: WorkerPool,
    scheduler: Arc<Scheduler>,
}

impl TaskSystem {
    /// Start the worker claim loop and the scheduler tick loop.
    pub fn start(&self) {
        self.workers.start();
        self.scheduler.start();
    }

    /// Stop the scheduler, then the worker pool with the configured grace.
    /// Returns whether all in-flight executions drained in time.
    pub async fn shutdown(&self) -> bool {
        self.scheduler.shutdown().await;
        self.workers.shutdown(self.config.workers.shutdown_grace()).await
    }

    /// Delete terminal records older than the configured retention.
    ///
    /// # Errors
    ///
    /// `QueueError::Persistence` if the store write fails.
    pub async fn cleanup_expired(&self) -> Result<usize, QueueError> {
        self.queue.cleanup(self.config.queue.retention_secs).await
    }

    /// Shared queue handle.
    #[must_use]
    pub const fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Worker pool.
    #[must_use]
    pub const fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Scheduler, for registering recurring definitions.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Configuration the system was built from.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }
}

/// Build a task system whose lifecycle events go to `tracing`.
///
/// Uses a [`JsonFileStore`] when `queue.store_path` is set, otherwise an
/// in-memory store. Nothing runs until [`TaskSystem::start`].
///
/// # Errors
///
/// `QueueError::Validation` for invalid configuration; `QueueError::Persistence`
/// if the store cannot be opened or recovered.
pub async fn build_task_system(
    config: CoreConfig,
    registry: FunctionRegistry,
) -> Result<TaskSystem, QueueError> {
    build_task_system_with_sink(config, registry, Arc::new(TracingEventSink)).await
}

/// Build a task system reporting lifecycle events to `sink`.
///
/// # Errors
///
/// Same as [`build_task_system`].
pub async fn build_task_system_with_sink(
    config: CoreConfig,
    registry: FunctionRegistry,
    sink: Arc<dyn EventSink>,
) -> Result<TaskSystem, QueueError> {
    config.validate().map_err(QueueError::Validation)?;

    let store: Arc<dyn TaskStore> = match &config.queue.store_path {
        Some(path) => Arc::new(JsonFileStore::new(path)?),
        None => Arc::new(InMemoryStore::new()),
    };
    let registry = Arc::new(registry);
    let queue = Arc::new(
        TaskQueue::open_with_sink(config.queue.clone(), Arc::clone(&registry), store, sink).await?,
    );
    let workers = WorkerPool::new(config.workers.clone(), Arc::clone(&queue), registry)?;
    let scheduler = Arc::new(Scheduler::new(config.scheduler.clone(), Arc::clone(&queue))?);

    info!(
        functions = queue.registry().len(),
        concurrency = config.workers.concurrency,
        persistent = config.queue.store_path.is_some(),
        "task system built"
    );
    Ok(TaskSystem {
        config,
        queue,
        workers,
        scheduler,
    })
}

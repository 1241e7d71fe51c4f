//! API-facing request/response models and the submission/inspection surface.
//!
//! Outer layers (HTTP handlers, CLIs) call these functions instead of reaching
//! into the queue directly; every model is serde-serializable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::builders::TaskSystem;
use crate::core::{
    PoolStats, QueueError, QueueStats, TaskFailure, TaskQueue, TaskRecord, TaskRequest,
    TaskStatus,
};
use crate::util::serde::{Priority, TaskId};

/// Task submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Human-readable label.
    pub name: String,
    /// Registered function key.
    pub callable_ref: String,
    /// Arguments.
    #[serde(default)]
    pub args: Value,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Retry ceiling; queue default when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Timeout in seconds; queue default when absent.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl From<TaskSubmission> for TaskRequest {
    fn from(s: TaskSubmission) -> Self {
        Self {
            name: s.name,
            callable_ref: s.callable_ref,
            args: s.args,
            priority: s.priority,
            max_retries: s.max_retries,
            timeout_seconds: s.timeout_seconds,
        }
    }
}

/// Task status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Label.
    pub name: String,
    /// Current status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Attempts so far.
    pub attempt: u32,
    /// Retry ceiling.
    pub max_retries: u32,
    /// Creation time (ms since epoch).
    pub created_at_ms: u128,
    /// Start of the latest attempt.
    pub started_at_ms: Option<u128>,
    /// Terminal time.
    pub finished_at_ms: Option<u128>,
    /// Result of a completed task.
    pub result: Option<Value>,
    /// Latest failure.
    pub error: Option<TaskFailure>,
}

impl From<TaskRecord> for TaskStatusResponse {
    fn from(r: TaskRecord) -> Self {
        Self {
            task_id: r.id,
            name: r.name,
            status: r.status,
            priority: r.priority,
            attempt: r.attempt,
            max_retries: r.max_retries,
            created_at_ms: r.created_at_ms,
            started_at_ms: r.started_at_ms,
            finished_at_ms: r.finished_at_ms,
            result: r.result,
            error: r.error,
        }
    }
}

/// Filter for [`list_tasks`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTasksQuery {
    /// Only records in this status.
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// At most this many records, oldest first.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Cleanup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResponse {
    /// Records deleted.
    pub removed: usize,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: the worker pool is claiming work.
    pub ok: bool,
    /// Queue counts.
    pub queue: QueueStats,
    /// Worker counters.
    pub workers: PoolStats,
    /// Registered scheduler definitions.
    pub schedules: usize,
}

/// Error payload for API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&QueueError> for ApiError {
    fn from(err: &QueueError) -> Self {
        let code = match err {
            QueueError::Validation(_) => "validation",
            QueueError::InvalidTransition { .. } => "invalid_transition",
            QueueError::NotFound(_) => "not_found",
            QueueError::Persistence(_) => "persistence",
        };
        Self {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

/// Submit a task.
///
/// # Errors
///
/// `Validation` or `Persistence` from [`TaskQueue::enqueue`].
pub async fn submit_task(
    queue: &TaskQueue,
    req: TaskSubmission,
) -> Result<TaskStatusResponse, QueueError> {
    let id = queue.enqueue(req.into()).await?;
    task_status(queue, id)
}

/// Current state of one task.
///
/// # Errors
///
/// `QueueError::NotFound` for an unknown id.
pub fn task_status(queue: &TaskQueue, id: TaskId) -> Result<TaskStatusResponse, QueueError> {
    queue
        .get(id)
        .map(TaskStatusResponse::from)
        .ok_or_else(|| QueueError::task_not_found(id))
}

/// Tasks in enqueue order.
#[must_use]
pub fn list_tasks(queue: &TaskQueue, query: &ListTasksQuery) -> Vec<TaskStatusResponse> {
    queue
        .list(query.status)
        .into_iter()
        .take(query.limit.unwrap_or(usize::MAX))
        .map(TaskStatusResponse::from)
        .collect()
}

/// Counts per status.
#[must_use]
pub fn queue_stats(queue: &TaskQueue) -> QueueStats {
    queue.stats()
}

/// Cancel a pending task.
///
/// # Errors
///
/// `NotFound`, `InvalidTransition` when the task is not pending, or `Persistence`.
pub async fn cancel_task(queue: &TaskQueue, id: TaskId) -> Result<TaskStatusResponse, QueueError> {
    queue.cancel(id).await.map(TaskStatusResponse::from)
}

/// Delete finished tasks older than `older_than_seconds`.
///
/// # Errors
///
/// `QueueError::Persistence` if the store write fails.
pub async fn cleanup_tasks(
    queue: &TaskQueue,
    older_than_seconds: u64,
) -> Result<CleanupResponse, QueueError> {
    let removed = queue.cleanup(older_than_seconds).await?;
    Ok(CleanupResponse { removed })
}

/// Return a health payload.
#[must_use]
pub fn health(system: &TaskSystem) -> Health {
    Health {
        ok: system.workers().is_running(),
        queue: system.queue().stats(),
        workers: system.workers().stats(),
        schedules: system.scheduler().definitions().len(),
    }
}

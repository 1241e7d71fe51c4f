//! Error types for queue, worker and scheduler operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::TaskStatus;
use crate::util::serde::TaskId;

/// Errors produced by the queue API and the components built on it.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Rejected enqueue or registration arguments; no state was created.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Attempted a status change that the task state machine does not allow.
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        /// Task the transition was attempted on.
        id: TaskId,
        /// Status the record was in.
        from: TaskStatus,
        /// Status that was requested.
        to: TaskStatus,
    },
    /// No task record or scheduled definition with this key.
    #[error("not found: {0}")]
    NotFound(String),
    /// Store read/write failure; the triggering operation did not take effect.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl QueueError {
    /// Shorthand for a `NotFound` error on a task id.
    #[must_use]
    pub fn task_not_found(id: TaskId) -> Self {
        Self::NotFound(format!("task {id}"))
    }

    /// Whether this error is an API misuse of the state machine.
    #[must_use]
    pub const fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

/// Classification of a failed execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The task body returned an error or panicked.
    ExecutionError,
    /// The task body exceeded its time budget.
    TimeoutError,
}

/// Failure captured into a task record. Never propagated out of the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct TaskFailure {
    /// Execution or timeout.
    pub kind: FailureKind,
    /// Message of the underlying error.
    pub message: String,
}

impl TaskFailure {
    /// Failure raised by the task body.
    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ExecutionError,
            message: message.into(),
        }
    }

    /// Failure caused by an elapsed timeout.
    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self {
            kind: FailureKind::TimeoutError,
            message: format!("execution exceeded {}s", after.as_secs_f64()),
        }
    }

    /// Whether the attempt ran out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::TimeoutError
    }
}

/// Application-facing result using anyhow, returned by task bodies.
pub type AppResult<T> = Result<T, anyhow::Error>;

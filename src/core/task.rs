//! Task records, their lifecycle states, and enqueue requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{QueueError, TaskFailure};
use crate::util::serde::{Priority, TaskId};

/// Lifecycle state of a task record.
///
/// ```text
/// Pending -> Running -> Completed
///               |  \--> Failed
///               v
///           Retrying -> Pending
/// Pending -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Failed an attempt, waiting out its backoff.
    Retrying,
    /// Finished successfully.
    Completed,
    /// Failed with no retries left.
    Failed,
    /// Cancelled before it was claimed.
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Running,
        Self::Retrying,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// No further transitions are possible from a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine has an edge `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Retrying | Self::Failed)
                | (Self::Retrying, Self::Pending)
        )
    }

    /// Stable uppercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown task status `{s}`"))
    }
}

/// One unit of work and its lifecycle state.
///
/// Owned by the [`TaskQueue`](crate::core::TaskQueue); callers only ever see clones.
/// All mutation goes through the transition methods below, which enforce the
/// state machine and keep timestamps non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique identifier.
    pub id: TaskId,
    /// Human-readable label, not unique.
    pub name: String,
    /// Key into the function registry.
    pub callable_ref: String,
    /// Arguments handed to the function.
    pub args: Value,
    /// Ordering class, fixed at creation.
    pub priority: Priority,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Enqueue counter used as the final FIFO tie-breaker.
    pub sequence: u64,
    /// Execution attempts so far (incremented on claim).
    pub attempt: u32,
    /// Additional attempts allowed after the first failure.
    pub max_retries: u32,
    /// Per-attempt execution budget.
    pub timeout_seconds: Option<u64>,
    /// Creation time (ms since epoch).
    pub created_at_ms: u128,
    /// Start of the latest attempt.
    pub started_at_ms: Option<u128>,
    /// Time a terminal status was reached.
    pub finished_at_ms: Option<u128>,
    /// Last transition time.
    pub updated_at_ms: u128,
    /// Time from which the record competes for dequeue order.
    pub ready_at_ms: u128,
    /// When a retrying record becomes due.
    pub retry_at_ms: Option<u128>,
    /// Value returned by a successful execution.
    pub result: Option<Value>,
    /// Failure of the latest attempt.
    pub error: Option<TaskFailure>,
}

impl TaskRecord {
    /// Build a fresh pending record from a validated request.
    #[must_use]
    pub fn new(id: TaskId, request: ResolvedRequest, sequence: u64, now_ms: u128) -> Self {
        Self {
            id,
            name: request.name,
            callable_ref: request.callable_ref,
            args: request.args,
            priority: request.priority,
            status: TaskStatus::Pending,
            sequence,
            attempt: 0,
            max_retries: request.max_retries,
            timeout_seconds: request.timeout_seconds,
            created_at_ms: now_ms,
            started_at_ms: None,
            finished_at_ms: None,
            updated_at_ms: now_ms,
            ready_at_ms: now_ms,
            retry_at_ms: None,
            result: None,
            error: None,
        }
    }

    /// Whether another attempt is allowed after the current one failed.
    #[must_use]
    pub const fn has_retries_left(&self) -> bool {
        self.attempt <= self.max_retries
    }

    /// Whether the record is retrying and its backoff has elapsed.
    #[must_use]
    pub fn is_retry_due(&self, now_ms: u128) -> bool {
        self.status == TaskStatus::Retrying && self.retry_at_ms.is_none_or(|at| at <= now_ms)
    }

    fn transition(&mut self, next: TaskStatus, now_ms: u128) -> Result<u128, QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        let now = now_ms.max(self.updated_at_ms);
        self.status = next;
        self.updated_at_ms = now;
        Ok(now)
    }

    /// `Pending -> Running`; counts a new attempt.
    pub fn start_attempt(&mut self, now_ms: u128) -> Result<(), QueueError> {
        let now = self.transition(TaskStatus::Running, now_ms)?;
        self.attempt += 1;
        self.started_at_ms = Some(now);
        Ok(())
    }

    /// `Running -> Completed`.
    pub fn mark_completed(&mut self, result: Value, now_ms: u128) -> Result<(), QueueError> {
        let now = self.transition(TaskStatus::Completed, now_ms)?;
        self.finished_at_ms = Some(now);
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    /// `Running -> Failed`.
    pub fn mark_failed(&mut self, failure: TaskFailure, now_ms: u128) -> Result<(), QueueError> {
        let now = self.transition(TaskStatus::Failed, now_ms)?;
        self.finished_at_ms = Some(now);
        self.result = None;
        self.error = Some(failure);
        Ok(())
    }

    /// `Running -> Retrying`, due at `retry_at_ms`.
    pub fn schedule_retry(
        &mut self,
        failure: TaskFailure,
        retry_at_ms: u128,
        now_ms: u128,
    ) -> Result<(), QueueError> {
        let now = self.transition(TaskStatus::Retrying, now_ms)?;
        self.retry_at_ms = Some(retry_at_ms.max(now));
        self.error = Some(failure);
        Ok(())
    }

    /// `Retrying -> Pending`; re-enters dequeue order at its retry-ready time.
    pub fn requeue(&mut self, now_ms: u128) -> Result<(), QueueError> {
        let now = self.transition(TaskStatus::Pending, now_ms)?;
        self.ready_at_ms = now;
        self.retry_at_ms = None;
        Ok(())
    }

    /// `Pending -> Cancelled`.
    pub fn mark_cancelled(&mut self, now_ms: u128) -> Result<(), QueueError> {
        let now = self.transition(TaskStatus::Cancelled, now_ms)?;
        self.finished_at_ms = Some(now);
        Ok(())
    }

    /// Re-admit a record found `Running` after a restart.
    ///
    /// Not a state-machine edge: the worker that claimed it is gone. The
    /// interrupted attempt is not counted so the retry ceiling still holds.
    pub(crate) fn recover_interrupted(&mut self, now_ms: u128) {
        let now = now_ms.max(self.updated_at_ms);
        self.status = TaskStatus::Pending;
        self.attempt = self.attempt.saturating_sub(1);
        self.started_at_ms = None;
        self.updated_at_ms = now;
    }
}

/// Enqueue arguments. Unset fields fall back to the queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Human-readable label.
    pub name: String,
    /// Registered function key.
    pub callable_ref: String,
    /// Serialized arguments.
    #[serde(default)]
    pub args: Value,
    /// Ordering class.
    #[serde(default)]
    pub priority: Priority,
    /// Override for the configured default retry ceiling.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Override for the configured default timeout.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl TaskRequest {
    /// Request with no arguments and default priority.
    pub fn new(name: impl Into<String>, callable_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            callable_ref: callable_ref.into(),
            args: Value::Null,
            priority: Priority::Normal,
            max_retries: None,
            timeout_seconds: None,
        }
    }

    /// Serialize `args` into the request.
    ///
    /// # Errors
    ///
    /// `QueueError::Validation` if `args` cannot be represented as JSON.
    pub fn with_args<A: Serialize + ?Sized>(mut self, args: &A) -> Result<Self, QueueError> {
        self.args = serde_json::to_value(args)
            .map_err(|e| QueueError::Validation(format!("args are not serializable: {e}")))?;
        Ok(self)
    }

    /// Set the ordering class.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry ceiling.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// A request with configuration defaults applied.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    /// Label.
    pub name: String,
    /// Function key.
    pub callable_ref: String,
    /// Arguments.
    pub args: Value,
    /// Ordering class.
    pub priority: Priority,
    /// Retry ceiling.
    pub max_retries: u32,
    /// Timeout, if any.
    pub timeout_seconds: Option<u64>,
}

//! Task records, the durable queue, the worker pool and the scheduler.

pub mod error;
pub mod events;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod worker_pool;

pub use error::{AppResult, FailureKind, QueueError, TaskFailure};
pub use events::{build_task_event, EventSink, InMemoryEventSink, TaskEvent, TracingEventSink};
pub use queue::{QueueStats, TaskQueue};
pub use registry::{FunctionRegistry, TaskFunction};
pub use retry::RetryPolicy;
pub use scheduler::{ScheduleSpec, ScheduledDefinition, Scheduler, Trigger};
pub use task::{ResolvedRequest, TaskRecord, TaskRequest, TaskStatus};
pub use worker_pool::{PoolStats, WorkerPool};

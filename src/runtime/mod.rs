//! Submission and inspection API surface.

pub mod api;

pub use api::{
    cancel_task, cleanup_tasks, health, list_tasks, queue_stats, submit_task, task_status,
    ApiError, CleanupResponse, Health, ListTasksQuery, TaskStatusResponse, TaskSubmission,
};

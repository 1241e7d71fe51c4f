//! Builders to wire the queue, worker pool and scheduler from configuration.

pub mod system_builder;

pub use system_builder::{build_task_system, build_task_system_with_sink, TaskSystem};

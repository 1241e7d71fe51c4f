//! # Prometheus Task Queue
//!
//! An in-process asynchronous task-processing core for the Prometheus AI Platform.
//!
//! Work that must not be lost on restart (PDF rendering, bill-of-materials
//! calculation, catalog validation, statistics) is submitted as a serializable
//! request naming a registered function. The crate takes it from there:
//!
//! - **Durable priority queue**: every state transition is written to a JSON
//!   snapshot store before it is acknowledged; records interrupted by a crash
//!   are re-admitted on the next start.
//! - **Bounded worker pool**: at most `N` task bodies run at once, async or
//!   blocking, each with an optional timeout.
//! - **Retry with backoff**: failed attempts are retried after
//!   `base * 2^(attempt-1)` until `max_retries` is exhausted.
//! - **Scheduler**: interval and daily wall-clock triggers that enqueue
//!   recurring work.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_task_queue::builders::build_task_system;
//! use prometheus_task_queue::config::CoreConfig;
//! use prometheus_task_queue::core::{FunctionRegistry, TaskRequest};
//! use prometheus_task_queue::util::serde::Priority;
//!
//! let mut registry = FunctionRegistry::new();
//! registry.register_fn("pdf.render", |args| async move {
//!     Ok(serde_json::json!({ "rendered": args["quote_id"] }))
//! })?;
//!
//! let config = CoreConfig::default();
//! let system = build_task_system(config, registry).await?;
//! system.start();
//!
//! let id = system
//!     .queue()
//!     .enqueue(
//!         TaskRequest::new("quote 42", "pdf.render")
//!             .with_args(&serde_json::json!({ "quote_id": 42 }))?
//!             .with_priority(Priority::High)
//!             .with_max_retries(3),
//!     )
//!     .await?;
//!
//! // ...
//! system.shutdown().await;
//! ```
//!
//! Delivery is at-least-once: a task interrupted by a crash runs again, so task
//! bodies must be idempotent.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task records, queue, worker pool, scheduler and events.
pub mod core;
/// Configuration models for the queue, worker pool and scheduler.
pub mod config;
/// Builders to wire the queue, worker pool and scheduler from configuration.
pub mod builders;
/// Persistent store backends.
pub mod infra;
/// Submission and inspection API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;

//! Lifecycle event sinks.
//!
//! The queue reports every record transition through an [`EventSink`] so that
//! outer layers (metrics, audit logs, dashboards) can observe the core without
//! touching its state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::TaskId;

/// Lifecycle event for one task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Action taken (enqueue, start, complete, retry, requeue, fail, cancel, recover, cleanup).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Event sink abstraction.
pub trait EventSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: TaskEvent);
}

/// Bounded in-memory sink for testing and dev.
pub struct InMemoryEventSink {
    events: parking_lot::Mutex<VecDeque<TaskEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: parking_lot::Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Actions recorded for one task, oldest first.
    #[must_use]
    pub fn actions_for(&self, task_id: TaskId) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.action.clone())
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&self, event: TaskEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: TaskEvent) {
        tracing::debug!(
            task_id = %event.task_id,
            action = %event.action,
            detail = event.detail.as_deref().unwrap_or(""),
            "task event"
        );
    }
}

/// Helper to build an event stamped with the current time.
pub fn build_task_event(
    task_id: TaskId,
    action: impl Into<String>,
    detail: Option<String>,
) -> TaskEvent {
    let action = action.into();
    let created_at_ms = now_ms();
    TaskEvent {
        event_id: format!("{task_id}-{action}-{created_at_ms}"),
        task_id,
        action,
        created_at_ms,
        detail,
    }
}

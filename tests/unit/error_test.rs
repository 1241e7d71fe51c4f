//! Tests for error types

use std::time::Duration;

use prometheus_task_queue::core::{FailureKind, QueueError, TaskFailure, TaskStatus};
use prometheus_task_queue::util::serde::new_task_id;

#[test]
fn test_queue_error_display() {
    let err = QueueError::Validation("name must not be empty".into());
    assert_eq!(err.to_string(), "validation failed: name must not be empty");

    let err = QueueError::Persistence("disk full".into());
    assert_eq!(err.to_string(), "persistence error: disk full");
}

#[test]
fn test_invalid_transition_display() {
    let id = new_task_id();
    let err = QueueError::InvalidTransition {
        id,
        from: TaskStatus::Running,
        to: TaskStatus::Cancelled,
    };
    assert!(err.is_invalid_transition());
    assert_eq!(
        err.to_string(),
        format!("invalid transition for task {id}: RUNNING -> CANCELLED")
    );
}

#[test]
fn test_task_not_found() {
    let id = new_task_id();
    let err = QueueError::task_not_found(id);
    assert!(matches!(err, QueueError::NotFound(ref m) if m.contains(&id.to_string())));
    assert!(!err.is_invalid_transition());
}

#[test]
fn test_task_failure_kinds() {
    let failure = TaskFailure::execution("division by zero");
    assert_eq!(failure.kind, FailureKind::ExecutionError);
    assert!(!failure.is_timeout());

    let failure = TaskFailure::timeout(Duration::from_secs(1));
    assert_eq!(failure.kind, FailureKind::TimeoutError);
    assert!(failure.is_timeout());
    assert!(failure.message.contains("1s"));
}

#[test]
fn test_task_failure_serialized_kind() {
    let json = serde_json::to_value(TaskFailure::execution("boom")).unwrap();
    assert_eq!(json["kind"], "EXECUTION_ERROR");
    assert_eq!(json["message"], "boom");

    let json = serde_json::to_value(TaskFailure::timeout(Duration::from_secs(2))).unwrap();
    assert_eq!(json["kind"], "TIMEOUT_ERROR");
}

//! Tests for the submission/inspection API surface

use prometheus_task_queue::builders::build_task_system;
use prometheus_task_queue::config::CoreConfig;
use prometheus_task_queue::core::{FunctionRegistry, QueueError, TaskQueue, TaskStatus};
use prometheus_task_queue::runtime::{
    cancel_task, cleanup_tasks, health, list_tasks, queue_stats, submit_task, task_status,
    ApiError, ListTasksQuery, TaskSubmission,
};
use prometheus_task_queue::util::serde::{new_task_id, Priority};
use serde_json::{json, Value};
use std::sync::Arc;

fn queue() -> TaskQueue {
    let mut registry = FunctionRegistry::new();
    registry
        .register_blocking("catalog.validate", |_| Ok(Value::Bool(true)))
        .unwrap();
    TaskQueue::in_memory(Default::default(), Arc::new(registry))
}

fn submission(name: &str) -> TaskSubmission {
    serde_json::from_value(json!({
        "name": name,
        "callable_ref": "catalog.validate",
        "args": { "sku": name },
        "priority": "high",
    }))
    .unwrap()
}

#[tokio::test]
async fn test_submit_and_status() {
    let q = queue();
    let submitted = submit_task(&q, submission("A-1")).await.unwrap();
    assert_eq!(submitted.status, TaskStatus::Pending);
    assert_eq!(submitted.priority, Priority::High);
    assert_eq!(submitted.attempt, 0);

    let status = task_status(&q, submitted.task_id).unwrap();
    assert_eq!(status.name, "A-1");
    assert!(matches!(
        task_status(&q, new_task_id()),
        Err(QueueError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_submit_validation_error_payload() {
    let q = queue();
    let mut bad = submission("A-1");
    bad.callable_ref = "catalog.unknown".into();
    let err = submit_task(&q, bad).await.unwrap_err();
    let payload = ApiError::from(&err);
    assert_eq!(payload.code, "validation");
    assert!(q.is_empty());
}

#[tokio::test]
async fn test_list_cancel_and_cleanup() {
    let q = queue();
    let a = submit_task(&q, submission("a")).await.unwrap();
    submit_task(&q, submission("b")).await.unwrap();
    submit_task(&q, submission("c")).await.unwrap();

    let cancelled = cancel_task(&q, a.task_id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    let again = cancel_task(&q, a.task_id).await.unwrap_err();
    assert_eq!(ApiError::from(&again).code, "invalid_transition");

    let pending = list_tasks(
        &q,
        &ListTasksQuery {
            status: Some(TaskStatus::Pending),
            limit: Some(1),
        },
    );
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "b");
    assert_eq!(list_tasks(&q, &ListTasksQuery::default()).len(), 3);

    let stats = queue_stats(&q);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.cancelled, 1);

    assert_eq!(cleanup_tasks(&q, 0).await.unwrap().removed, 1);
    assert_eq!(cleanup_tasks(&q, 0).await.unwrap().removed, 0);
}

#[tokio::test]
async fn test_health_reports_running_pool() {
    let mut registry = FunctionRegistry::new();
    registry.register_blocking("noop", |_| Ok(Value::Null)).unwrap();
    let system = build_task_system(CoreConfig::default(), registry).await.unwrap();

    assert!(!health(&system).ok);
    system.start();
    let report = health(&system);
    assert!(report.ok);
    assert_eq!(report.queue.total, 0);
    assert_eq!(report.schedules, 0);
    system.shutdown().await;
    assert!(!health(&system).ok);
}

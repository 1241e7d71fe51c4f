//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use prometheus_task_queue::builders::{build_task_system, build_task_system_with_sink};
use prometheus_task_queue::config::{CoreConfig, QueueConfig, WorkerPoolConfig};
use prometheus_task_queue::core::{FunctionRegistry, InMemoryEventSink, QueueError, TaskRequest, TaskStatus};
use serde_json::{json, Value};

fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry
        .register_fn("stats.compute", |args: Value| async move {
            Ok(json!({ "sum": args["values"].as_array().map_or(0, Vec::len) }))
        })
        .unwrap();
    registry
}

#[tokio::test]
async fn test_build_in_memory_system() {
    let system = build_task_system(CoreConfig::default(), registry()).await.unwrap();
    assert!(system.queue().is_empty());
    assert!(!system.workers().is_running());
    assert_eq!(system.queue().registry().keys(), vec!["stats.compute".to_string()]);
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let config = CoreConfig {
        workers: WorkerPoolConfig::new().with_concurrency(0),
        ..CoreConfig::default()
    };
    let err = build_task_system(config, registry()).await.unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));
}

#[tokio::test]
async fn test_system_runs_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    let config = CoreConfig {
        queue: QueueConfig::default().with_store_path(&path),
        workers: WorkerPoolConfig::new()
            .with_concurrency(2)
            .with_poll_interval(Duration::from_millis(20)),
        ..CoreConfig::default()
    };

    let sink = Arc::new(InMemoryEventSink::new(100));
    let system = build_task_system_with_sink(config.clone(), registry(), sink.clone())
        .await
        .unwrap();
    system.start();
    let id = system
        .queue()
        .enqueue(
            TaskRequest::new("sum", "stats.compute")
                .with_args(&json!({ "values": [1, 2, 3] }))
                .unwrap(),
        )
        .await
        .unwrap();

    for _ in 0..100 {
        if system.queue().get(id).unwrap().status == TaskStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(system.shutdown().await);
    assert_eq!(sink.actions_for(id), vec!["enqueue", "start", "complete"]);

    let reopened = build_task_system(config, registry()).await.unwrap();
    let record = reopened.queue().get(id).unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.result, Some(json!({ "sum": 3 })));
}

//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_task_queue::config::{CoreConfig, QueueConfig, SchedulerConfig, WorkerPoolConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = CoreConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.queue.default_max_retries, 0);
    assert_eq!(cfg.queue.default_timeout_secs, None);
    assert_eq!(cfg.workers.backoff_base_ms, 2_000);
    assert!(cfg.workers.concurrency >= 1);
    assert_eq!(cfg.scheduler.tick(), Duration::from_secs(1));
}

#[test]
fn test_worker_config_invalid_concurrency() {
    let invalid = WorkerPoolConfig::new().with_concurrency(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_queue_config_rejects_zero_timeout() {
    let invalid = QueueConfig::default().with_default_timeout_secs(0);
    assert!(invalid.validate().is_err());
    assert!(QueueConfig::default().with_default_timeout_secs(30).validate().is_ok());
}

#[test]
fn test_scheduler_config_rejects_zero_tick() {
    let invalid = SchedulerConfig { tick_ms: 0 };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_retry_policy_from_backoff_base() {
    let cfg = WorkerPoolConfig::new().with_backoff_base(Duration::from_millis(100));
    let policy = cfg.retry_policy();
    assert_eq!(policy.next_delay(1), Duration::from_millis(100));
    assert_eq!(policy.next_delay(3), Duration::from_millis(400));
}

#[test]
fn test_backoff_ceiling_configurable() {
    let cfg = WorkerPoolConfig::new()
        .with_backoff_base(Duration::from_millis(100))
        .with_backoff_max(Duration::from_millis(300));
    assert!(cfg.validate().is_ok());
    let policy = cfg.retry_policy();
    assert_eq!(policy.next_delay(2), Duration::from_millis(200));
    assert_eq!(policy.next_delay(3), Duration::from_millis(300));

    // A base above the ceiling would be clamped below itself.
    let err = WorkerPoolConfig::new()
        .with_backoff_base(Duration::from_secs(7_200))
        .validate()
        .unwrap_err();
    assert!(err.contains("backoff_max_ms"), "{err}");
    let cfg = WorkerPoolConfig::new()
        .with_backoff_base(Duration::from_secs(7_200))
        .with_backoff_max(Duration::from_secs(14_400));
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.retry_policy().next_delay(1), Duration::from_secs(7_200));
}

#[test]
fn test_from_json_str_partial_sections() {
    let cfg = CoreConfig::from_json_str(
        r#"{ "queue": { "default_max_retries": 3 }, "workers": { "concurrency": 2 } }"#,
    )
    .unwrap();
    assert_eq!(cfg.queue.default_max_retries, 3);
    assert_eq!(cfg.workers.concurrency, 2);
    assert_eq!(cfg.workers.poll_interval_ms, 500);
    assert_eq!(cfg.scheduler.tick_ms, 1_000);
}

#[test]
fn test_from_json_str_rejects_invalid() {
    let err = CoreConfig::from_json_str(r#"{ "workers": { "concurrency": 0 } }"#).unwrap_err();
    assert!(err.starts_with("workers:"), "{err}");
    assert!(CoreConfig::from_json_str("not json").is_err());
}

#[test]
fn test_env_overrides() {
    let mut cfg = CoreConfig::default();
    cfg.apply_overrides(lookup(&[
        ("TASKQ_STORE_PATH", "/var/lib/taskq/tasks.json"),
        ("TASKQ_WORKERS", "8"),
        ("TASKQ_DEFAULT_MAX_RETRIES", "3"),
        ("TASKQ_DEFAULT_TIMEOUT_SECS", "45"),
        ("TASKQ_BACKOFF_BASE_MS", "250"),
        ("TASKQ_BACKOFF_MAX_MS", "60000"),
        ("TASKQ_SCHEDULER_TICK_MS", "200"),
    ]))
    .unwrap();
    assert_eq!(
        cfg.queue.store_path.as_deref(),
        Some(std::path::Path::new("/var/lib/taskq/tasks.json"))
    );
    assert_eq!(cfg.workers.concurrency, 8);
    assert_eq!(cfg.queue.default_max_retries, 3);
    assert_eq!(cfg.queue.default_timeout_secs, Some(45));
    assert_eq!(cfg.workers.backoff_base_ms, 250);
    assert_eq!(cfg.workers.backoff_max_ms, 60_000);
    assert_eq!(cfg.scheduler.tick_ms, 200);

    cfg.apply_overrides(lookup(&[("TASKQ_DEFAULT_TIMEOUT_SECS", "none")]))
        .unwrap();
    assert_eq!(cfg.queue.default_timeout_secs, None);
}

#[test]
fn test_env_override_parse_error_names_variable() {
    let mut cfg = CoreConfig::default();
    let err = cfg
        .apply_overrides(lookup(&[("TASKQ_WORKERS", "many")]))
        .unwrap_err();
    assert!(err.contains("TASKQ_WORKERS"), "{err}");
}

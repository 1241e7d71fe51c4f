//! Tests for utility modules

use std::time::Duration;

use prometheus_task_queue::util::clock::{after_ms, now_ms};
use prometheus_task_queue::util::serde::{new_task_id, Priority};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_parse_and_display() {
    for priority in Priority::ALL {
        assert_eq!(priority.to_string().parse::<Priority>().unwrap(), priority);
    }
    assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
    assert!("urgent".parse::<Priority>().is_err());
}

#[test]
fn test_priority_serde() {
    assert_eq!(serde_json::to_string(&Priority::Critical).unwrap(), "\"critical\"");
    let p: Priority = serde_json::from_str("\"low\"").unwrap();
    assert_eq!(p, Priority::Low);
}

#[test]
fn test_task_ids_unique() {
    let ids: std::collections::HashSet<_> = (0..1000).map(|_| new_task_id()).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn test_clock_helpers() {
    let now = now_ms();
    assert_eq!(after_ms(now, Duration::from_millis(1500)), now + 1500);
    assert_eq!(after_ms(u128::MAX, Duration::from_secs(1)), u128::MAX);
}

#[test]
fn test_init_tracing_only_once() {
    use prometheus_task_queue::util::telemetry::{init_tracing, DEFAULT_DIRECTIVE};

    let _ = init_tracing();
    assert!(!init_tracing());
    assert!(DEFAULT_DIRECTIVE.starts_with("prometheus_task_queue"));
}

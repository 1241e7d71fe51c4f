//! Integration tests for the Scheduler tick loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Timelike};
use prometheus_task_queue::config::{QueueConfig, SchedulerConfig};
use prometheus_task_queue::core::{
    FunctionRegistry, ScheduleSpec, Scheduler, TaskQueue, TaskStatus, Trigger,
};
use prometheus_task_queue::util::serde::Priority;
use serde_json::{json, Value};

fn setup(tick: Duration) -> (Arc<TaskQueue>, Arc<Scheduler>) {
    let mut registry = FunctionRegistry::new();
    registry
        .register_blocking("stats.daily_report", |_| Ok(Value::Null))
        .unwrap();
    let queue = Arc::new(TaskQueue::in_memory(QueueConfig::default(), Arc::new(registry)));
    let scheduler = Scheduler::new(SchedulerConfig::default().with_tick(tick), Arc::clone(&queue)).unwrap();
    (queue, Arc::new(scheduler))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interval_fires_once_per_window() {
    let (queue, scheduler) = setup(Duration::from_millis(50));
    scheduler
        .schedule_interval(
            ScheduleSpec::new("report", "stats.daily_report")
                .with_args(&json!({ "scope": "quotes" }))
                .unwrap()
                .with_priority(Priority::Low),
            Duration::from_millis(500),
        )
        .unwrap();
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    scheduler.shutdown().await;

    // Windows open at ~500ms and ~1000ms.
    let tasks = queue.list(None);
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert_eq!(task.name, "report");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::Low);
        assert_eq!(task.args, json!({ "scope": "quotes" }));
    }
    let def = scheduler.definition("report").unwrap();
    assert_eq!(def.fire_count, 2);
    assert!(def.last_error.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_enqueue_does_not_stop_loop() {
    let (queue, scheduler) = setup(Duration::from_millis(20));
    scheduler
        .schedule_interval(ScheduleSpec::new("broken", "stats.missing"), Duration::from_millis(100))
        .unwrap();
    scheduler
        .schedule_interval(
            ScheduleSpec::new("zero-timeout", "stats.daily_report").with_timeout_seconds(0),
            Duration::from_millis(100),
        )
        .unwrap();
    scheduler
        .schedule_interval(ScheduleSpec::new("healthy", "stats.daily_report"), Duration::from_millis(100))
        .unwrap();
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(350)).await;
    scheduler.shutdown().await;

    let broken = scheduler.definition("broken").unwrap();
    assert_eq!(broken.fire_count, 0);
    assert!(broken.last_fired_at.is_some());
    assert!(broken.last_error.is_some());
    assert!(scheduler.definition("zero-timeout").unwrap().last_error.is_some());

    let healthy = scheduler.definition("healthy").unwrap();
    assert!(healthy.fire_count >= 2, "fired {}", healthy.fire_count);
    assert_eq!(queue.len(), usize::try_from(healthy.fire_count).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disable_while_running() {
    let (queue, scheduler) = setup(Duration::from_millis(20));
    scheduler
        .schedule_interval(ScheduleSpec::new("report", "stats.daily_report"), Duration::from_millis(100))
        .unwrap();
    scheduler.start();
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.disable("report").unwrap();
    let fired = queue.len();
    assert_eq!(fired, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(queue.len(), fired);
    assert!(!scheduler.definition("report").unwrap().enabled);

    scheduler.enable("report").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(queue.len(), fired + 1);

    scheduler.shutdown().await;
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_daily_definition_snapshot() {
    let (queue, scheduler) = setup(Duration::from_millis(20));
    let later = chrono::Local::now() + chrono::TimeDelta::hours(12);
    let (hour, minute) = (later.hour(), later.minute());
    scheduler
        .schedule_daily(ScheduleSpec::new("nightly", "stats.daily_report"), hour, minute)
        .unwrap();

    let defs = scheduler.definitions();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name(), "nightly");
    assert_eq!(defs[0].trigger, Trigger::Daily { hour, minute });
    assert!(defs[0].enabled);
    assert!(defs[0].last_fired_at.is_none());

    // The window is about twelve hours away.
    assert_eq!(scheduler.run_pending().await, 0);
    assert!(queue.is_empty());

    let json = serde_json::to_value(&defs[0]).unwrap();
    assert_eq!(json["trigger"]["type"], "daily");
    assert_eq!(json["spec"]["callable_ref"], "stats.daily_report");
}

fn local(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2030, 6, day, hour, minute, second)
        .earliest()
        .unwrap()
}

#[tokio::test]
async fn test_daily_fires_once_per_day_at_wall_clock() {
    let (queue, scheduler) = setup(Duration::from_millis(20));
    scheduler
        .schedule_daily(ScheduleSpec::new("nightly", "stats.daily_report"), 9, 0)
        .unwrap();

    // Not before the slot.
    assert_eq!(scheduler.run_pending_at(local(10, 8, 59, 59)).await, 0);

    // At the slot, once.
    assert_eq!(scheduler.run_pending_at(local(10, 9, 0, 0)).await, 1);
    assert_eq!(scheduler.run_pending_at(local(10, 9, 0, 1)).await, 0);
    assert_eq!(scheduler.run_pending_at(local(10, 17, 30, 0)).await, 0);

    // A clock stepped back across the slot does not fire it again.
    assert_eq!(scheduler.run_pending_at(local(10, 8, 59, 0)).await, 0);
    assert_eq!(scheduler.run_pending_at(local(10, 9, 0, 0)).await, 0);

    // Next day, late (e.g. after a suspend), still fires exactly once.
    assert_eq!(scheduler.run_pending_at(local(11, 8, 0, 0)).await, 0);
    assert_eq!(scheduler.run_pending_at(local(11, 11, 15, 0)).await, 1);
    assert_eq!(scheduler.run_pending_at(local(11, 11, 15, 1)).await, 0);

    let def = scheduler.definition("nightly").unwrap();
    assert_eq!(def.fire_count, 2);
    assert_eq!(def.last_fired_at, Some(local(11, 11, 15, 0)));
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn test_daily_starts_disabled_until_enabled() {
    let (queue, scheduler) = setup(Duration::from_millis(20));
    scheduler
        .schedule_daily(
            ScheduleSpec::new("nightly", "stats.daily_report").with_enabled(false),
            9,
            0,
        )
        .unwrap();
    assert!(!scheduler.definition("nightly").unwrap().enabled);
    assert_eq!(scheduler.run_pending_at(local(10, 9, 0, 0)).await, 0);

    scheduler.enable("nightly").unwrap();
    assert_eq!(scheduler.run_pending_at(local(10, 9, 0, 0)).await, 1);
    assert_eq!(queue.len(), 1);
}

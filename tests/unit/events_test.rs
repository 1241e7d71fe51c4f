//! Tests for lifecycle event sinks

use prometheus_task_queue::core::{build_task_event, EventSink, InMemoryEventSink, TracingEventSink};
use prometheus_task_queue::util::serde::new_task_id;

#[test]
fn test_in_memory_event_sink() {
    let sink = InMemoryEventSink::new(10);
    let id = new_task_id();

    sink.record(build_task_event(id, "enqueue", Some("pdf.render".to_string())));
    sink.record(build_task_event(id, "start", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, id);
    assert_eq!(events[0].action, "enqueue");
    assert_eq!(events[0].detail.as_deref(), Some("pdf.render"));
    assert_eq!(sink.actions_for(id), vec!["enqueue", "start"]);
}

#[test]
fn test_event_sink_overflow() {
    let sink = InMemoryEventSink::new(2);
    let id = new_task_id();
    for action in ["enqueue", "start", "complete"] {
        sink.record(build_task_event(id, action, None));
    }
    assert_eq!(sink.actions_for(id), vec!["start", "complete"]);
}

#[test]
fn test_actions_filtered_by_task() {
    let sink = InMemoryEventSink::new(10);
    let a = new_task_id();
    let b = new_task_id();
    sink.record(build_task_event(a, "enqueue", None));
    sink.record(build_task_event(b, "enqueue", None));
    sink.record(build_task_event(b, "cancel", None));
    assert_eq!(sink.actions_for(a), vec!["enqueue"]);
    assert_eq!(sink.actions_for(b), vec!["enqueue", "cancel"]);
}

#[test]
fn test_tracing_sink_accepts_events() {
    TracingEventSink.record(build_task_event(new_task_id(), "fail", Some("boom".into())));
}

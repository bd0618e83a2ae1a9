//! Tests for utility types and clocks

use std::time::Duration;

use prometheus_sequence_manager::util::{
    init_tracing, Clock, ManualClock, QueuePriority, RailMode, TaskType, WebSchedulingPriority,
};

#[test]
fn test_priority_ordering() {
    assert!(QueuePriority::Control > QueuePriority::Highest);
    assert!(QueuePriority::Highest > QueuePriority::High);
    assert!(QueuePriority::High > QueuePriority::Normal);
    assert!(QueuePriority::Normal > QueuePriority::Low);
    assert!(QueuePriority::Low > QueuePriority::BestEffort);
    assert_eq!(QueuePriority::default(), QueuePriority::Normal);
}

#[test]
fn test_web_scheduling_priority_mapping() {
    assert_eq!(
        WebSchedulingPriority::UserBlocking.queue_priority(),
        QueuePriority::High
    );
    assert_eq!(
        WebSchedulingPriority::UserVisible.queue_priority(),
        QueuePriority::Normal
    );
    assert_eq!(
        WebSchedulingPriority::Background.queue_priority(),
        QueuePriority::Low
    );
}

#[test]
fn test_value_types_serialize_snake_case() {
    assert_eq!(
        serde_json::to_string(&QueuePriority::BestEffort).unwrap(),
        "\"best_effort\""
    );
    assert_eq!(
        serde_json::from_str::<TaskType>("\"user_interaction\"").unwrap(),
        TaskType::UserInteraction
    );
    assert_eq!(
        serde_json::to_string(&RailMode::Animation).unwrap(),
        "\"animation\""
    );
}

#[test]
fn test_manual_clock_clones_share_time() {
    let clock = ManualClock::new();
    let other = clock.clone();
    let start = clock.now();

    other.advance(Duration::from_millis(5));
    assert_eq!(clock.now(), start + Duration::from_millis(5));

    clock.advance_to(start);
    assert_eq!(other.now(), start + Duration::from_millis(5));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    assert!(tracing::dispatcher::has_been_set());
}

//! Tests for building a scheduler from configuration

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus_sequence_manager::builders::build_scheduler;
use prometheus_sequence_manager::config::SchedulerConfig;
use prometheus_sequence_manager::core::SchedulerError;
use prometheus_sequence_manager::util::{ManualClock, QueuePriority, TaskType};

const CONFIG: &str = r#"{
    "default_task_type": "networking",
    "budget_pools": {
        "background": {
            "kind": "cpu_time",
            "cpu_percentage": 0.0,
            "initial_budget_ms": 10,
            "max_budget_level_ms": 10
        }
    },
    "queues": [
        { "name": "input", "priority": "highest", "task_types": ["user_interaction"] },
        {
            "name": "bg",
            "priority": "low",
            "can_be_throttled": true,
            "throttled": true,
            "budget_pools": ["background"],
            "task_types": ["background_work"]
        }
    ]
}"#;

#[test]
fn test_build_scheduler_creates_queues_and_pools() {
    let cfg = SchedulerConfig::from_json_str(CONFIG).unwrap();
    let clock = ManualClock::new();
    let built = build_scheduler(&cfg, Arc::new(clock.clone())).expect("built");

    let input = built.queue("input").unwrap();
    assert_eq!(input.priority(), QueuePriority::Highest);

    let bg = built.queue("bg").unwrap();
    assert!(bg.is_throttled());
    let pool = built.budget_pool("background").unwrap();
    assert!(bg.is_member_of(pool.as_ref()));
    assert_eq!(pool.queue_ids(), vec![bg.id()]);

    assert_eq!(
        built.manager.default_task_runner().task_type(),
        TaskType::Networking
    );
    assert_eq!(
        built
            .manager
            .task_runner_for(TaskType::BackgroundWork)
            .unwrap()
            .queue_name(),
        "bg"
    );
    assert!(built.manager.task_runner_for(TaskType::Rendering).is_none());
}

#[test]
fn test_built_scheduler_throttles_configured_queue() {
    let cfg = SchedulerConfig::from_json_str(CONFIG).unwrap();
    let clock = ManualClock::new();
    let built = build_scheduler(&cfg, Arc::new(clock.clone())).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let runner = built
        .manager
        .task_runner_table()
        .get(TaskType::BackgroundWork)
        .unwrap();
    for _ in 0..3 {
        let ran = Arc::clone(&ran);
        let clock = clock.clone();
        runner
            .post_task(move || {
                clock.advance(Duration::from_millis(10));
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    // 10ms of budget and no refill: exactly one task fits.
    assert_eq!(built.manager.run_until_idle().unwrap(), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(built.queue("bg").unwrap().pending_task_count(), 2);
}

#[test]
fn test_build_scheduler_rejects_invalid_config() {
    let mut cfg = SchedulerConfig::from_json_str(CONFIG).unwrap();
    cfg.queues[1].budget_pools.push("missing".into());

    let err = build_scheduler(&cfg, Arc::new(ManualClock::new())).unwrap_err();
    assert!(matches!(err, SchedulerError::Config(_)));
}

//! Tests for configuration validation

use std::time::Duration;

use prometheus_sequence_manager::config::{BudgetPoolConfig, QueueConfig, SchedulerConfig};
use prometheus_sequence_manager::util::{QueuePriority, TaskType};

const VALID: &str = r#"{
    "default_task_type": "networking",
    "budget_pools": {
        "background": {
            "kind": "cpu_time",
            "cpu_percentage": 0.1,
            "initial_budget_ms": 10,
            "max_budget_level_ms": 100
        },
        "timers": {
            "kind": "wake_up",
            "wake_up_interval_ms": 1000,
            "wake_up_duration_ms": 3
        }
    },
    "queues": [
        { "name": "input", "priority": "highest", "task_types": ["user_interaction"] },
        {
            "name": "bg",
            "priority": "low",
            "can_be_throttled": true,
            "throttled": true,
            "budget_pools": ["background", "timers"],
            "task_types": ["background_work"],
            "monitor_quiescence": true
        }
    ]
}"#;

fn queue(name: &str) -> QueueConfig {
    QueueConfig {
        name: name.to_string(),
        priority: QueuePriority::Normal,
        can_be_throttled: false,
        throttled: false,
        budget_pools: Vec::new(),
        task_types: Vec::new(),
        monitor_quiescence: false,
        non_waking: false,
    }
}

#[test]
fn test_parse_valid_config() {
    let cfg = SchedulerConfig::from_json_str(VALID).expect("valid config");
    assert_eq!(cfg.default_task_type, TaskType::Networking);
    assert_eq!(cfg.queues.len(), 2);

    let bg = cfg.queue("bg").unwrap();
    assert_eq!(bg.priority, QueuePriority::Low);
    assert!(bg.throttled);
    assert!(bg.monitor_quiescence);
    assert!(!cfg.queue("input").unwrap().can_be_throttled);

    let cpu = cfg.budget_pools["background"].cpu_time_config().unwrap();
    assert_eq!(cpu.initial_budget, Duration::from_millis(10));
    assert_eq!(cpu.max_budget_level, Some(Duration::from_millis(100)));
    assert_eq!(cpu.max_debt, Duration::from_secs(1));
    assert!(cfg.budget_pools["background"].wake_up_config().is_none());

    let wake = cfg.budget_pools["timers"].wake_up_config().unwrap();
    assert_eq!(wake.wake_up_duration, Duration::from_millis(3));
}

#[test]
fn test_empty_config_is_valid() {
    let cfg = SchedulerConfig::from_json_str("{}").unwrap();
    assert!(cfg.queues.is_empty());
    assert_eq!(cfg.default_task_type, TaskType::Default);
}

#[test]
fn test_parse_error_is_reported() {
    let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_rejects_duplicate_queue_names() {
    let cfg = SchedulerConfig {
        queues: vec![queue("net"), queue("net")],
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().unwrap_err().contains("duplicate queue name"));
}

#[test]
fn test_rejects_empty_queue_name() {
    let cfg = SchedulerConfig {
        queues: vec![queue("  ")],
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_rejects_unknown_pool_reference() {
    let mut bg = queue("bg");
    bg.budget_pools.push("missing".into());
    let cfg = SchedulerConfig {
        queues: vec![bg],
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().unwrap_err().contains("unknown budget pool"));
}

#[test]
fn test_rejects_throttled_without_can_be_throttled() {
    let mut bg = queue("bg");
    bg.throttled = true;
    assert!(bg.validate().is_err());
}

#[test]
fn test_rejects_task_type_routed_twice() {
    let mut a = queue("a");
    a.task_types.push(TaskType::Networking);
    let mut b = queue("b");
    b.task_types.push(TaskType::Networking);
    let cfg = SchedulerConfig {
        queues: vec![a, b],
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_budget_pool_parameter_validation() {
    let bad_percentage = BudgetPoolConfig::CpuTime {
        cpu_percentage: 1.5,
        initial_budget_ms: 0,
        max_budget_level_ms: None,
        max_debt_ms: 100,
    };
    assert!(bad_percentage.validate().is_err());

    let initial_over_cap = BudgetPoolConfig::CpuTime {
        cpu_percentage: 0.5,
        initial_budget_ms: 20,
        max_budget_level_ms: Some(10),
        max_debt_ms: 100,
    };
    assert!(initial_over_cap.validate().is_err());

    let window_too_long = BudgetPoolConfig::WakeUp {
        wake_up_interval_ms: 10,
        wake_up_duration_ms: 20,
    };
    assert!(window_too_long.validate().is_err());

    let zero_interval = BudgetPoolConfig::WakeUp {
        wake_up_interval_ms: 0,
        wake_up_duration_ms: 0,
    };
    assert!(zero_interval.validate().is_err());
}

#[test]
fn test_rejects_zero_budget_cap() {
    let zero_cap = BudgetPoolConfig::CpuTime {
        cpu_percentage: 0.5,
        initial_budget_ms: 0,
        max_budget_level_ms: Some(0),
        max_debt_ms: 100,
    };
    assert!(zero_cap
        .validate()
        .unwrap_err()
        .contains("max_budget_level_ms"));

    let json = r#"{
        "budget_pools": {
            "stuck": { "kind": "cpu_time", "cpu_percentage": 0.5, "max_budget_level_ms": 0 }
        }
    }"#;
    assert!(SchedulerConfig::from_json_str(json).is_err());
}

//! Tests for error types

use prometheus_sequence_manager::core::{AppResult, SchedulerError};

#[test]
fn test_invalid_state_error() {
    let err = SchedulerError::InvalidState("task queue `net` is shut down".to_string());
    assert_eq!(
        format!("{err}"),
        "invalid state: task queue `net` is shut down"
    );
}

#[test]
fn test_not_a_member_error() {
    let err = SchedulerError::NotAMember {
        queue: "bg".to_string(),
        pool: "cpu".to_string(),
    };
    assert_eq!(
        format!("{err}"),
        "queue `bg` is not a member of budget pool `cpu`"
    );
}

#[test]
fn test_config_error() {
    let err = SchedulerError::Config("bad".to_string());
    assert_eq!(format!("{err}"), "config error: bad");
}

#[test]
fn test_error_converts_into_app_result() {
    fn fails() -> AppResult<()> {
        Err(SchedulerError::InvariantViolation("underflow".into()))?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert_eq!(err.to_string(), "invariant violation: underflow");
    assert!(err.downcast_ref::<SchedulerError>().is_some());
}

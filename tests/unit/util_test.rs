//! Tests for utility functions

use std::time::Duration;

use prometheus_task_broker::core::{validate_queue_name, TaskId, WaitTimeout};
use prometheus_task_broker::util::{deadline_after, now, FAR_FUTURE};

#[test]
fn test_deadline_after_saturates() {
    let start = now();
    assert_eq!(deadline_after(start, Duration::MAX), start + FAR_FUTURE);
    assert_eq!(
        deadline_after(start, Duration::from_millis(10)),
        start + Duration::from_millis(10)
    );
}

#[test]
fn test_task_id_parse() {
    let id: TaskId = "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();
    assert_eq!(id.to_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
    assert!("not-a-uuid".parse::<TaskId>().is_err());
}

#[test]
fn test_task_id_from_u128() {
    assert_eq!(TaskId::from_u128(5), TaskId::from_u128(5));
    assert_ne!(TaskId::from_u128(5), TaskId::from_u128(6));
    assert_eq!(TaskId::from_u128(5).as_uuid().as_u128(), 5);
}

#[test]
fn test_wait_timeout_wire_encoding() {
    assert_eq!(WaitTimeout::from_millis(i64::MIN), WaitTimeout::Infinite);
    assert_eq!(WaitTimeout::from_millis(0), WaitTimeout::Immediate);
    assert_eq!(
        WaitTimeout::from_millis(1500),
        WaitTimeout::After(Duration::from_millis(1500))
    );
}

#[test]
fn test_queue_name_validation() {
    assert!(validate_queue_name("emails").is_ok());
    assert!(validate_queue_name("jobs.high-priority_2").is_ok());
    assert!(validate_queue_name("").is_err());
    assert!(validate_queue_name("a/b").is_err());
    assert!(validate_queue_name("with space").is_err());
    assert!(validate_queue_name("tab\there").is_err());
    assert!(validate_queue_name(&"q".repeat(255)).is_ok());
    assert!(validate_queue_name(&"q".repeat(256)).is_err());
}

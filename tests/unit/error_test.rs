//! Tests for error types

use prometheus_task_broker::core::{BrokerError, TaskId};

#[test]
fn test_validation_error() {
    let err = BrokerError::Validation("queues must not be empty".to_string());
    assert_eq!(format!("{}", err), "invalid request: queues must not be empty");
    assert!(err.is_client_error());
}

#[test]
fn test_invalid_queue_name_error() {
    let err = BrokerError::InvalidQueueName("a/b".to_string());
    assert_eq!(format!("{}", err), "invalid queue name: \"a/b\"");
    assert!(err.is_client_error());
}

#[test]
fn test_duplicate_id_error() {
    let id = TaskId::from_u128(1);
    let err = BrokerError::DuplicateId(id);
    assert_eq!(format!("{}", err), format!("duplicate task id: {id}"));
    assert!(err.is_client_error());
}

#[test]
fn test_id_exhausted_error() {
    let err = BrokerError::IdExhausted { attempts: 8 };
    assert_eq!(
        format!("{}", err),
        "could not allocate a unique task id after 8 attempts"
    );
    assert!(!err.is_client_error());
}

#[test]
fn test_shutdown_and_internal_errors() {
    assert_eq!(format!("{}", BrokerError::Shutdown), "broker is shut down");
    assert!(!BrokerError::Shutdown.is_client_error());

    let err = BrokerError::Internal("waiter w3 finalized twice".to_string());
    assert_eq!(format!("{}", err), "internal error: waiter w3 finalized twice");
    assert!(!err.is_client_error());
}

#[test]
fn test_app_result_wraps_broker_error() {
    fn fails() -> prometheus_task_broker::core::AppResult<()> {
        Err(BrokerError::Shutdown.into())
    }
    let err = fails().unwrap_err();
    assert!(err.downcast_ref::<BrokerError>().is_some());
}

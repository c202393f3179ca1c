//! Tests for builder modules

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use prometheus_task_broker::builders::QueueServerBuilder;
use prometheus_task_broker::config::BrokerConfig;
use prometheus_task_broker::core::{BrokerError, IdSource, TaskId, TaskSpec};
use prometheus_task_broker::runtime::TokioSpawner;
use serde_json::json;

/// Hands out 1, 2, 3, ...
#[derive(Default)]
struct SequentialIds(AtomicU64);

impl IdSource for SequentialIds {
    fn next_id(&self) -> TaskId {
        TaskId::from_u128(u128::from(self.0.fetch_add(1, Ordering::Relaxed) + 1))
    }
}

/// Always the same id.
struct StuckIds;

impl IdSource for StuckIds {
    fn next_id(&self) -> TaskId {
        TaskId::from_u128(7)
    }
}

#[test]
fn test_server_builder_defaults() {
    let builder = QueueServerBuilder::default();
    assert_eq!(builder.config(), &BrokerConfig::default());
}

#[test]
fn test_server_builder_overrides() {
    let builder = QueueServerBuilder::default()
        .with_gc_interval_secs(5)
        .with_default_retries(0)
        .with_default_lease_secs(30)
        .with_default_expiry_secs(0);
    let cfg = builder.config();
    assert_eq!(cfg.gc_interval_secs, 5);
    assert_eq!(cfg.default_retries, 0);
    assert_eq!(cfg.default_lease_secs, 30);
    assert_eq!(cfg.default_expiry_secs, 0);
}

#[test]
fn test_server_builder_from_json() {
    let builder = QueueServerBuilder::from_json_str(r#"{"default_retries": 1}"#).unwrap();
    assert_eq!(builder.config().default_retries, 1);

    let err = QueueServerBuilder::from_json_str(r#"{"bogus": 1}"#)
        .err()
        .expect("unknown field rejected");
    assert!(matches!(err, BrokerError::Validation(_)));
}

#[tokio::test]
async fn test_server_builder_rejects_invalid_config() {
    let err = QueueServerBuilder::default()
        .with_gc_interval_secs(0)
        .build(&TokioSpawner::current())
        .err()
        .expect("zero gc interval rejected");
    assert!(matches!(err, BrokerError::Validation(_)));
}

#[tokio::test]
async fn test_server_builder_applies_defaults_to_tasks() {
    let server = QueueServerBuilder::default()
        .with_default_retries(5)
        .build(&TokioSpawner::current())
        .unwrap();
    assert_eq!(server.config().default_retries, 5);

    server.enqueue("q", TaskSpec::new(json!("x"))).unwrap();
    let peeked = server.peek("q", 1);
    assert_eq!(peeked[0].retries_remaining, 5);
    server.shutdown();
}

#[tokio::test]
async fn test_server_builder_uses_id_source() {
    let server = QueueServerBuilder::default()
        .with_id_source(Arc::new(SequentialIds::default()))
        .build(&TokioSpawner::current())
        .unwrap();
    let first = server.enqueue("q", TaskSpec::new(json!(1))).unwrap();
    let second = server.enqueue("q", TaskSpec::new(json!(2))).unwrap();
    assert_eq!(first, TaskId::from_u128(1));
    assert_eq!(second, TaskId::from_u128(2));
    server.shutdown();
}

#[tokio::test]
async fn test_server_builder_id_exhaustion() {
    let server = QueueServerBuilder::default()
        .with_id_source(Arc::new(StuckIds))
        .build(&TokioSpawner::current())
        .unwrap();
    server.enqueue("q", TaskSpec::new(json!(1))).unwrap();
    let err = server.enqueue("q", TaskSpec::new(json!(2))).unwrap_err();
    assert!(matches!(err, BrokerError::IdExhausted { attempts: 8 }));
    assert_eq!(server.stats().tasks, 1);
    server.shutdown();
}

//! HTTP transport tests against an in-process router.

#![cfg(feature = "http")]

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use prometheus_task_broker::builders::QueueServerBuilder;
use prometheus_task_broker::core::{BrokerStats, QueueServer, TaskSnapshot};
use prometheus_task_broker::runtime::{router, EnqueueResponse, Health, SharedApi, TokioSpawner};
use serde_json::{json, Value};

fn setup(max_body_bytes: usize) -> (TestServer, QueueServer) {
    let broker = QueueServerBuilder::default()
        .build(&TokioSpawner::current())
        .expect("broker starts");
    let api: SharedApi = Arc::new(broker.clone());
    let server = TestServer::new(router(api, max_body_bytes)).expect("test server");
    (server, broker)
}

fn default_setup() -> (TestServer, QueueServer) {
    setup(64 * 1024 * 1024)
}

#[tokio::test]
async fn test_enqueue_wait_ack_round_trip() {
    let (server, broker) = default_setup();

    let res = server
        .post("/enqueue/emails")
        .json(&json!({"content": {"to": "a@b.c"}, "retries": 1, "lease": 30}))
        .await;
    res.assert_status_ok();
    let EnqueueResponse { id } = res.json();

    let res = server
        .post("/wait")
        .json(&json!({"queues": ["emails", "other"]}))
        .await;
    res.assert_status_ok();
    let got: Vec<Option<TaskSnapshot>> = res.json();
    assert_eq!(got.len(), 2);
    let task = got[0].as_ref().expect("task leased");
    assert_eq!(task.id, id);
    assert_eq!(task.content, json!({"to": "a@b.c"}));
    assert_eq!(task.retries_remaining, 1);
    assert!(got[1].is_none());

    server
        .post("/ack")
        .json(&json!({"ids": [id]}))
        .await
        .assert_status_ok();
    assert_eq!(broker.stats().tasks, 0);
}

#[tokio::test]
async fn test_wait_null_slots_serialize_as_null() {
    let (server, _broker) = default_setup();
    let res = server
        .post("/wait")
        .json(&json!({"queues": ["nothing"], "timeout": 0}))
        .await;
    res.assert_status_ok();
    assert_eq!(res.json::<Value>(), json!([null]));
}

#[tokio::test]
async fn test_nak_requeues() {
    let (server, _broker) = default_setup();
    let EnqueueResponse { id } = server
        .post("/enqueue/q")
        .json(&json!({"content": 1}))
        .await
        .json();
    server
        .post("/wait")
        .json(&json!({"queues": ["q"]}))
        .await
        .assert_status_ok();

    server
        .post("/nak")
        .json(&json!({"ids": [id]}))
        .await
        .assert_status_ok();

    let peeked: Vec<TaskSnapshot> = server
        .get("/peek/q")
        .add_query_param("n", 5)
        .await
        .json();
    assert_eq!(peeked.len(), 1);
    assert_eq!(peeked[0].id, id);
    assert_eq!(peeked[0].retries_remaining, 2);
}

#[tokio::test]
async fn test_ack_unknown_ids_is_ok() {
    let (server, _broker) = default_setup();
    server
        .post("/ack")
        .json(&json!({"ids": ["67e55044-10b1-426f-9247-bb680e5fe0c8"]}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_duplicate_id_conflicts() {
    let (server, _broker) = default_setup();
    let body = json!({"content": 1, "id": "67e55044-10b1-426f-9247-bb680e5fe0c8"});
    server.post("/enqueue/q").json(&body).await.assert_status_ok();

    let res = server.post("/enqueue/q").json(&body).await;
    res.assert_status(StatusCode::CONFLICT);
    let err: Value = res.json();
    assert!(err["error"].as_str().unwrap().contains("duplicate task id"));
}

#[tokio::test]
async fn test_malformed_bodies_are_bad_requests() {
    let (server, _broker) = default_setup();

    server
        .post("/enqueue/q")
        .text("{not json")
        .content_type("application/json")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // Missing JSON content type.
    server
        .post("/wait")
        .text(r#"{"queues": ["q"]}"#)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // Unknown field.
    server
        .post("/enqueue/q")
        .json(&json!({"content": 1, "ttl": 5}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/ack")
        .json(&json!({"ids": ["not-a-uuid"]}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_queue_name_is_bad_request() {
    let (server, _broker) = default_setup();
    let res = server
        .post("/wait")
        .json(&json!({"queues": ["has space"]}))
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);
    let err: Value = res.json();
    assert!(err["error"].as_str().unwrap().contains("invalid queue name"));
}

#[tokio::test]
async fn test_peek_requires_numeric_n() {
    let (server, _broker) = default_setup();
    server
        .get("/peek/q")
        .add_query_param("n", "many")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .get("/peek/q")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let empty: Vec<TaskSnapshot> = server.get("/peek/q").add_query_param("n", 3).await.json();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (server, broker) = setup(64);
    let res = server
        .post("/enqueue/q")
        .json(&json!({"content": "x".repeat(256)}))
        .await;
    res.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(broker.stats().tasks, 0);
}

#[tokio::test]
async fn test_queues_and_stats() {
    let (server, _broker) = default_setup();
    for queue in ["b", "a", "b"] {
        server
            .post(&format!("/enqueue/{queue}"))
            .json(&json!({"content": queue}))
            .await
            .assert_status_ok();
    }

    let names: Vec<String> = server.get("/queues").await.json();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

    let stats: BrokerStats = server.get("/stats").await.json();
    assert_eq!(stats.tasks, 3);
    assert_eq!(stats.queues, 2);
    assert_eq!(stats.dispatched, 0);
}

#[tokio::test]
async fn test_health_reports_shutdown() {
    let (server, broker) = default_setup();
    let res = server.get("/health").await;
    res.assert_status_ok();
    assert!(res.json::<Health>().ok);

    broker.shutdown();
    let res = server.get("/health").await;
    res.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert!(!res.json::<Health>().ok);

    server
        .post("/enqueue/q")
        .json(&json!({"content": 1}))
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

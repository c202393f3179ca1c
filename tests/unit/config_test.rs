//! Tests for configuration validation

use std::time::Duration;

use prometheus_task_broker::config::{BrokerConfig, ServerConfig};

#[test]
fn test_broker_config_defaults() {
    let cfg = BrokerConfig::default();
    assert_eq!(cfg.gc_interval_secs, 300);
    assert_eq!(cfg.default_lease_secs, 300);
    assert_eq!(cfg.default_expiry_secs, 86_400);
    assert_eq!(cfg.default_retries, 3);
    assert_eq!(cfg.max_id_attempts, 8);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.gc_interval(), Duration::from_secs(300));
}

#[test]
fn test_broker_config_invalid_gc_interval() {
    let cfg = BrokerConfig {
        gc_interval_secs: 0,
        ..BrokerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_broker_config_invalid_id_attempts() {
    let cfg = BrokerConfig {
        max_id_attempts: 0,
        ..BrokerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_broker_config_zero_lease_and_expiry_are_valid() {
    let cfg = BrokerConfig {
        default_lease_secs: 0,
        default_expiry_secs: 0,
        default_retries: 0,
        ..BrokerConfig::default()
    };
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.default_lease(), Duration::ZERO);
    assert_eq!(cfg.default_expiry(), Duration::ZERO);
}

#[test]
fn test_broker_config_from_json_partial() {
    let cfg = BrokerConfig::from_json_str(r#"{"default_retries": 7}"#).unwrap();
    assert_eq!(cfg.default_retries, 7);
    assert_eq!(cfg.gc_interval_secs, 300);
}

#[test]
fn test_broker_config_from_json_rejects_unknown_and_invalid() {
    assert!(BrokerConfig::from_json_str(r#"{"retries": 7}"#).is_err());
    assert!(BrokerConfig::from_json_str(r#"{"gc_interval_secs": 0}"#).is_err());
    assert!(BrokerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_server_config_from_json_nested() {
    let cfg = ServerConfig::from_json_str(
        r#"{
            "bind_addr": "0.0.0.0:7000",
            "worker_threads": 2,
            "broker": { "default_lease_secs": 10 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.bind_addr, "0.0.0.0:7000");
    assert_eq!(cfg.worker_threads, 2);
    assert_eq!(cfg.max_body_bytes, 64 * 1024 * 1024);
    assert_eq!(cfg.broker.default_lease_secs, 10);
}

#[test]
fn test_server_config_validation() {
    let valid = ServerConfig::default();
    assert!(valid.worker_threads > 0);
    assert!(valid.validate().is_ok());

    let no_addr = ServerConfig {
        bind_addr: "  ".into(),
        ..ServerConfig::default()
    };
    assert!(no_addr.validate().is_err());

    let no_body = ServerConfig {
        max_body_bytes: 0,
        ..ServerConfig::default()
    };
    assert!(no_body.validate().is_err());

    let bad_broker = ServerConfig::from_json_str(r#"{"broker": {"max_id_attempts": 0}}"#);
    assert!(bad_broker.unwrap_err().contains("broker invalid"));
}

#[test]
fn test_server_config_from_lookup() {
    let cfg = ServerConfig::from_lookup(|key| match key {
        "EMQ_ADDR" => Some("127.0.0.1:9999".into()),
        "EMQ_MAX_BODY_BYTES" => Some("1024".into()),
        "EMQ_DEFAULT_EXPIRY_SECS" => Some("0".into()),
        "EMQ_MAX_ID_ATTEMPTS" => Some("2".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.bind_addr, "127.0.0.1:9999");
    assert_eq!(cfg.max_body_bytes, 1024);
    assert_eq!(cfg.broker.default_expiry_secs, 0);
    assert_eq!(cfg.broker.max_id_attempts, 2);
}

#[test]
fn test_server_config_from_lookup_rejects_negative_retries() {
    let err = ServerConfig::from_lookup(|key| {
        (key == "EMQ_DEFAULT_RETRIES").then(|| "-1".to_string())
    })
    .unwrap_err();
    assert!(err.contains("EMQ_DEFAULT_RETRIES"));
}

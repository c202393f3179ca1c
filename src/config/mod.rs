//! Configuration models for the broker engine and the HTTP daemon.

pub mod broker;

pub use broker::{BrokerConfig, ServerConfig};

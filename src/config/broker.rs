//! Broker and server configuration structures.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default periodic GC interval in seconds.
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 300;
/// Default lease length in seconds.
pub const DEFAULT_LEASE_SECS: u64 = 300;
/// Default task time to live in seconds.
pub const DEFAULT_EXPIRY_SECS: u64 = 86_400;
/// Default retry budget.
pub const DEFAULT_RETRIES: u32 = 3;
/// Default number of id candidates tried per enqueue.
pub const DEFAULT_MAX_ID_ATTEMPTS: u32 = 8;
/// Default request body cap (64 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Engine settings: defaults applied to tasks and the GC cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Seconds between periodic GC sweeps.
    pub gc_interval_secs: u64,
    /// Lease length for tasks that do not set one; 0 disables lease timeouts.
    pub default_lease_secs: u64,
    /// Time to live for tasks that do not set one; 0 means never expire.
    pub default_expiry_secs: u64,
    /// Retry budget for tasks that do not set one.
    pub default_retries: u32,
    /// Id candidates tried before an enqueue fails.
    pub max_id_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
            default_lease_secs: DEFAULT_LEASE_SECS,
            default_expiry_secs: DEFAULT_EXPIRY_SECS,
            default_retries: DEFAULT_RETRIES,
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
        }
    }
}

impl BrokerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.gc_interval_secs == 0 {
            return Err("gc_interval_secs must be greater than 0".into());
        }
        if self.max_id_attempts == 0 {
            return Err("max_id_attempts must be greater than 0".into());
        }
        Ok(())
    }

    /// Periodic GC interval.
    #[must_use]
    pub const fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    /// Default lease length (zero disables lease timeouts).
    #[must_use]
    pub const fn default_lease(&self) -> Duration {
        Duration::from_secs(self.default_lease_secs)
    }

    /// Default time to live (zero means never expire).
    #[must_use]
    pub const fn default_expiry(&self) -> Duration {
        Duration::from_secs(self.default_expiry_secs)
    }

    /// Parse broker configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self, get: &impl Fn(&str) -> Option<String>) -> Result<(), String> {
        if let Some(v) = parse_var(get, "EMQ_GC_INTERVAL_SECS")? {
            self.gc_interval_secs = v;
        }
        if let Some(v) = parse_var(get, "EMQ_DEFAULT_LEASE_SECS")? {
            self.default_lease_secs = v;
        }
        if let Some(v) = parse_var(get, "EMQ_DEFAULT_EXPIRY_SECS")? {
            self.default_expiry_secs = v;
        }
        if let Some(v) = parse_var(get, "EMQ_DEFAULT_RETRIES")? {
            self.default_retries = v;
        }
        if let Some(v) = parse_var(get, "EMQ_MAX_ID_ATTEMPTS")? {
            self.max_id_attempts = v;
        }
        Ok(())
    }
}

/// Process-level settings for the HTTP daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_addr: String,
    /// Tokio worker threads.
    pub worker_threads: usize,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Engine settings.
    pub broker: BrokerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            worker_threads: num_cpus::get(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            broker: BrokerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate server and nested broker configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.bind_addr.trim().is_empty() {
            return Err("bind_addr must not be empty".into());
        }
        if self.worker_threads == 0 {
            return Err("worker_threads must be greater than 0".into());
        }
        if self.max_body_bytes == 0 {
            return Err("max_body_bytes must be greater than 0".into());
        }
        self.broker
            .validate()
            .map_err(|e| format!("broker invalid: {e}"))
    }

    /// Parse server configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `EMQ_*` variables from the process environment.
    ///
    /// Call `dotenvy::dotenv()` beforehand to pick up a `.env` file.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by variables from `get`, then validated.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        if let Some(addr) = get("EMQ_ADDR") {
            cfg.bind_addr = addr;
        }
        if let Some(v) = parse_var(&get, "EMQ_WORKER_THREADS")? {
            cfg.worker_threads = v;
        }
        if let Some(v) = parse_var(&get, "EMQ_MAX_BODY_BYTES")? {
            cfg.max_body_bytes = v;
        }
        cfg.broker.apply_env(&get)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| format!("{key}={raw:?} is invalid: {e}"))
        })
        .transpose()
}

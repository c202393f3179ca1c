//! Builder to construct a queue server from configuration.

use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::core::{BrokerError, IdSource, QueueServer, RandomIdSource, Spawn};

/// Assembles a [`QueueServer`] from configuration, an id source and a
/// spawner for its background loops.
pub struct QueueServerBuilder {
    config: BrokerConfig,
    ids: Arc<dyn IdSource>,
}

impl Default for QueueServerBuilder {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl QueueServerBuilder {
    /// Builder starting from `config` with random ids.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            ids: Arc::new(RandomIdSource),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(input: &str) -> Result<Self, BrokerError> {
        BrokerConfig::from_json_str(input)
            .map(Self::new)
            .map_err(|e| BrokerError::Validation(format!("config invalid: {e}")))
    }

    /// Replace the id source.
    #[must_use]
    pub fn with_id_source(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Override the periodic GC interval.
    #[must_use]
    pub const fn with_gc_interval_secs(mut self, secs: u64) -> Self {
        self.config.gc_interval_secs = secs;
        self
    }

    /// Override the default retry budget.
    #[must_use]
    pub const fn with_default_retries(mut self, retries: u32) -> Self {
        self.config.default_retries = retries;
        self
    }

    /// Override the default lease length.
    #[must_use]
    pub const fn with_default_lease_secs(mut self, secs: u64) -> Self {
        self.config.default_lease_secs = secs;
        self
    }

    /// Override the default time to live.
    #[must_use]
    pub const fn with_default_expiry_secs(mut self, secs: u64) -> Self {
        self.config.default_expiry_secs = secs;
        self
    }

    /// Configuration that [`QueueServerBuilder::build`] will use.
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Validate the configuration and start the server on `spawner`.
    pub fn build<S: Spawn>(self, spawner: &S) -> Result<QueueServer, BrokerError> {
        self.config
            .validate()
            .map_err(|e| BrokerError::Validation(format!("config invalid: {e}")))?;
        QueueServer::start_with_ids(self.config, self.ids, spawner)
    }
}

//! API-facing request/response models and the broker surface used by
//! transports.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{
    BrokerError, BrokerStats, QueueServer, TaskId, TaskSnapshot, TaskSpec, WaitResult, WaitTimeout,
};

/// Enqueue payload. Durations are whole seconds; `0` disables the lease
/// timeout or the expiry respectively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnqueueRequest {
    /// Opaque task payload.
    #[serde(default)]
    pub content: Value,
    /// Retry budget override.
    #[serde(default)]
    pub retries: Option<u32>,
    /// Lease length override in seconds.
    #[serde(default)]
    pub lease: Option<u64>,
    /// Time to live override in seconds.
    #[serde(default)]
    pub expiry: Option<u64>,
    /// Caller-chosen task id.
    #[serde(default)]
    pub id: Option<TaskId>,
}

impl EnqueueRequest {
    /// Convert to the engine's task description.
    #[must_use]
    pub fn into_spec(self) -> TaskSpec {
        TaskSpec {
            content: self.content,
            retries: self.retries,
            lease: self.lease.map(Duration::from_secs),
            expiry: self.expiry.map(Duration::from_secs),
            id: self.id,
        }
    }
}

/// Enqueue result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    /// Id of the stored task.
    pub id: TaskId,
}

/// Wait payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitRequest {
    /// Queue names, one per requested task.
    pub queues: Vec<String>,
    /// Milliseconds to block. Negative blocks forever; absent or zero
    /// answers immediately.
    #[serde(default)]
    pub timeout: i64,
}

/// Ack/nak payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdsRequest {
    /// Tasks to resolve; unknown ids are ignored.
    pub ids: Vec<TaskId>,
}

/// Peek query string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeekQuery {
    /// Maximum number of tasks to return.
    pub n: usize,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Return a health payload.
#[must_use]
pub const fn health(ok: bool) -> Health {
    Health { ok }
}

/// Operations a transport needs from the broker.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Store a task in `queue`.
    async fn enqueue(
        &self,
        queue: &str,
        req: EnqueueRequest,
    ) -> Result<EnqueueResponse, BrokerError>;
    /// Block for one task per requested queue.
    async fn wait(&self, req: WaitRequest) -> Result<WaitResult, BrokerError>;
    /// Acknowledge leased tasks.
    async fn ack(&self, req: IdsRequest) -> Result<(), BrokerError>;
    /// Report leased tasks as failed.
    async fn nak(&self, req: IdsRequest) -> Result<(), BrokerError>;
    /// Known queue names.
    fn list_queues(&self) -> Vec<String>;
    /// Up to `n` dispatchable tasks of `queue`.
    fn peek(&self, queue: &str, n: usize) -> Vec<TaskSnapshot>;
    /// Broker counters.
    fn stats(&self) -> BrokerStats;
    /// False once the broker stopped accepting work.
    fn is_healthy(&self) -> bool;
}

#[async_trait]
impl BrokerApi for QueueServer {
    async fn enqueue(
        &self,
        queue: &str,
        req: EnqueueRequest,
    ) -> Result<EnqueueResponse, BrokerError> {
        let id = Self::enqueue(self, queue, req.into_spec())?;
        Ok(EnqueueResponse { id })
    }

    async fn wait(&self, req: WaitRequest) -> Result<WaitResult, BrokerError> {
        Self::wait(self, req.queues, WaitTimeout::from_millis(req.timeout)).await
    }

    async fn ack(&self, req: IdsRequest) -> Result<(), BrokerError> {
        for id in req.ids {
            Self::ack(self, id).await?;
        }
        Ok(())
    }

    async fn nak(&self, req: IdsRequest) -> Result<(), BrokerError> {
        for id in req.ids {
            self.fail(id).await?;
        }
        Ok(())
    }

    fn list_queues(&self) -> Vec<String> {
        Self::list_queues(self)
    }

    fn peek(&self, queue: &str, n: usize) -> Vec<TaskSnapshot> {
        Self::peek(self, queue, n)
    }

    fn stats(&self) -> BrokerStats {
        Self::stats(self)
    }

    fn is_healthy(&self) -> bool {
        !self.is_shut_down()
    }
}

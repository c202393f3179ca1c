//! Error types for broker operations.

use thiserror::Error;

use crate::core::ids::TaskId;

/// Errors produced by broker components.
///
/// Unknown task ids on ack/fail are deliberately absent: they are benign
/// races with expiry or a concurrent resolution and are treated as no-ops.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed request shape; nothing was mutated.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Queue name is empty or contains characters the broker refuses.
    #[error("invalid queue name: {0:?}")]
    InvalidQueueName(String),
    /// A caller-supplied task id is already live.
    #[error("duplicate task id: {0}")]
    DuplicateId(TaskId),
    /// The id source kept producing live ids.
    #[error("could not allocate a unique task id after {attempts} attempts")]
    IdExhausted {
        /// Number of candidates tried before giving up.
        attempts: u32,
    },
    /// Broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
    /// The broker has been shut down.
    #[error("broker is shut down")]
    Shutdown,
}

impl BrokerError {
    /// True for errors caused by the request itself rather than broker state.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidQueueName(_) | Self::DuplicateId(_)
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

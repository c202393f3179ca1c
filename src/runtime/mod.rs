//! Runtime adapters and the transport-facing API surface.

pub mod api;
#[cfg(feature = "http")]
pub mod http;
pub mod tokio_spawner;

pub use api::{
    health, BrokerApi, EnqueueRequest, EnqueueResponse, Health, IdsRequest, PeekQuery, WaitRequest,
};
#[cfg(feature = "http")]
pub use http::{router, ApiError, SharedApi};
pub use tokio_spawner::TokioSpawner;

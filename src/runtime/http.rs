//! HTTP transport over axum.
//!
//! | Method | Path              | Body / query                              |
//! |--------|-------------------|-------------------------------------------|
//! | POST   | `/enqueue/:queue` | `{content, retries?, lease?, expiry?, id?}` |
//! | POST   | `/wait`           | `{queues, timeout?}`                      |
//! | POST   | `/ack`            | `{ids}`                                   |
//! | POST   | `/nak`            | `{ids}`                                   |
//! | GET    | `/peek/:queue`    | `?n=N`                                    |
//! | GET    | `/queues`         |                                           |
//! | GET    | `/stats`          |                                           |
//! | GET    | `/health`         |                                           |

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::core::{BrokerError, BrokerStats, TaskSnapshot, WaitResult};
use crate::runtime::api::{
    health, BrokerApi, EnqueueRequest, EnqueueResponse, Health, IdsRequest, PeekQuery, WaitRequest,
};

/// Broker handle shared by all handlers.
pub type SharedApi = Arc<dyn BrokerApi>;

/// Error returned by handlers; rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    /// Failure reported by the broker.
    Broker(BrokerError),
    /// Body or query string could not be decoded.
    BadRequest(String),
    /// Body exceeded the configured limit.
    PayloadTooLarge(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Broker(err) => match err {
                BrokerError::Validation(_) | BrokerError::InvalidQueueName(_) => {
                    StatusCode::BAD_REQUEST
                }
                BrokerError::DuplicateId(_) => StatusCode::CONFLICT,
                BrokerError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
                BrokerError::IdExhausted { .. } | BrokerError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Broker(err) => err.to_string(),
            Self::BadRequest(msg) | Self::PayloadTooLarge(msg) => msg.clone(),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self::Broker(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(rejection.body_text())
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        } else {
            tracing::debug!(%status, error = %message, "request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the router. `max_body_bytes` caps every request body.
pub fn router(api: SharedApi, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/enqueue/:queue", post(enqueue))
        .route("/wait", post(wait))
        .route("/ack", post(ack))
        .route("/nak", post(nak))
        .route("/peek/:queue", get(peek))
        .route("/queues", get(queues))
        .route("/stats", get(stats))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(api)
}

async fn enqueue(
    State(api): State<SharedApi>,
    Path(queue): Path<String>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let Json(req) = body?;
    Ok(Json(api.enqueue(&queue, req).await?))
}

async fn wait(
    State(api): State<SharedApi>,
    body: Result<Json<WaitRequest>, JsonRejection>,
) -> Result<Json<WaitResult>, ApiError> {
    let Json(req) = body?;
    Ok(Json(api.wait(req).await?))
}

async fn ack(
    State(api): State<SharedApi>,
    body: Result<Json<IdsRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = body?;
    api.ack(req).await?;
    Ok(StatusCode::OK)
}

async fn nak(
    State(api): State<SharedApi>,
    body: Result<Json<IdsRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = body?;
    api.nak(req).await?;
    Ok(StatusCode::OK)
}

async fn peek(
    State(api): State<SharedApi>,
    Path(queue): Path<String>,
    query: Result<Query<PeekQuery>, QueryRejection>,
) -> Result<Json<Vec<TaskSnapshot>>, ApiError> {
    let Query(PeekQuery { n }) = query?;
    Ok(Json(api.peek(&queue, n)))
}

async fn queues(State(api): State<SharedApi>) -> Json<Vec<String>> {
    Json(api.list_queues())
}

async fn stats(State(api): State<SharedApi>) -> Json<BrokerStats> {
    Json(api.stats())
}

async fn health_check(State(api): State<SharedApi>) -> (StatusCode, Json<Health>) {
    let ok = api.is_healthy();
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health(ok)))
}

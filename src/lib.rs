//! # Prometheus Task Broker
//!
//! A lightweight, in-memory task broker with lease-based delivery.
//!
//! Producers enqueue tasks into named FIFO queues. Consumers block until one
//! task from each queue they asked for is available, receive a time-bounded
//! lease on those tasks, and must acknowledge or fail them before the lease
//! runs out. Failed and timed-out leases are retried until the task's retry
//! budget is spent; tasks past their expiry are dropped unconditionally.
//!
//! ## Core Pieces
//!
//! - **Broker**: task table, queues, and two deadline heaps (expiry and lease)
//! - **Waiter registry**: blocked consumers, served strictly oldest first
//! - **Deferred scheduler**: one timer task delivering lease and wait timeouts
//! - **Event loop**: applies ack, fail and timeout outcomes one at a time
//!
//! All mutable state sits behind a single `parking_lot::Mutex`; background
//! work is driven by tokio tasks started through a [`core::Spawn`] impl.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prometheus_task_broker::builders::QueueServerBuilder;
//! use prometheus_task_broker::core::{TaskSpec, WaitTimeout};
//! use prometheus_task_broker::runtime::TokioSpawner;
//! use std::time::Duration;
//!
//! let server = QueueServerBuilder::default().build(&TokioSpawner::current())?;
//! server.enqueue("emails", TaskSpec::new(serde_json::json!({"to": "a@b.c"})))?;
//!
//! let leased = server
//!     .wait(vec!["emails".into()], WaitTimeout::After(Duration::from_secs(5)))
//!     .await?;
//! if let Some(task) = &leased[0] {
//!     server.ack(task.id).await?;
//! }
//! ```
//!
//! With the default `http` feature, [`runtime::http::router`] exposes the
//! same operations as a JSON API and the `emqd` binary serves it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Broker engine: tasks, queues, leases, waiters and scheduling.
pub mod core;
/// Configuration models for the broker and the daemon.
pub mod config;
/// Builders to construct broker components from configuration.
pub mod builders;
/// Runtime adapters and the transport-facing API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;

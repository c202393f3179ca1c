//! Broker engine: tasks, queues, leases, waiters and the deferred scheduler.

pub mod broker;
pub mod deadline;
pub mod error;
pub mod ids;
pub mod lease;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod task;
pub mod waiter;

pub use broker::{validate_queue_name, Broker, BrokerStats, GcReport, Lease, LeaseKey};
pub use deadline::DeadlineQueue;
pub use error::{AppResult, BrokerError};
pub use ids::{IdSource, RandomIdSource, TaskId, WaiterId};
pub use lease::{BrokerEvent, LeaseTracker, Outcome, StatusEvent};
pub use queue::{Cursor, Queue};
pub use scheduler::{DeferredScheduler, Spawn};
pub use server::QueueServer;
pub use task::{Task, TaskSnapshot, TaskSpec, TaskStatus};
pub use waiter::{WaitResult, WaitTimeout, WaiterRegistry};

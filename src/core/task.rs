//! Task model: payload plus lease, retry and expiry state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::core::broker::LeaseKey;
use crate::core::ids::TaskId;
use crate::util::clock::deadline_after;

/// Terminal outcome reported for a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Consumer acknowledged completion.
    Ok,
    /// Consumer reported failure.
    Fail,
    /// Lease ran out before the consumer answered.
    Timeout,
}

/// Producer-side description of a task to enqueue.
///
/// `None` fields fall back to the broker defaults. A zero lease means the
/// lease never times out; a zero expiry means the task never expires.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    /// Opaque payload.
    pub content: Value,
    /// Additional failed or timed-out leases tolerated.
    pub retries: Option<u32>,
    /// Lease length granted on each dispatch.
    pub lease: Option<Duration>,
    /// Time to live from enqueue.
    pub expiry: Option<Duration>,
    /// Caller-chosen id; generated when absent.
    pub id: Option<TaskId>,
}

impl TaskSpec {
    /// Spec carrying only content; everything else uses broker defaults.
    #[must_use]
    pub fn new(content: Value) -> Self {
        Self {
            content,
            ..Self::default()
        }
    }

    /// Override the retry budget.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Override the lease length (`Duration::ZERO` disables lease timeouts).
    #[must_use]
    pub const fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Override the time to live (`Duration::ZERO` means never expire).
    #[must_use]
    pub const fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Use a caller-chosen id.
    #[must_use]
    pub const fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }
}

/// A unit of work held by the broker.
///
/// Queue links (`prev`/`next`) are task ids into the broker's task table, so
/// unlinking is O(1) without shared ownership.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    queue: String,
    content: Value,
    retries_remaining: i64,
    lease_duration: Option<Duration>,
    expiry_deadline: Option<Instant>,
    dispatched: bool,
    lease_deadline: Option<Instant>,
    /// Incremented on every dispatch; identifies the current lease.
    lease_epoch: u64,
    /// Highest lease epoch whose failure has been charged to the budget.
    settled_epoch: u64,
    /// Lease timed out in GC and the budget decision is still outstanding.
    awaiting_settlement: bool,
    pub(crate) prev: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
}

impl Task {
    /// Build a task. Durations of zero are treated as "unset".
    #[must_use]
    pub fn new(
        id: TaskId,
        queue: impl Into<String>,
        content: Value,
        retries: u32,
        lease_duration: Option<Duration>,
        expiry: Option<Duration>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            content,
            retries_remaining: i64::from(retries),
            lease_duration: lease_duration.filter(|d| !d.is_zero()),
            expiry_deadline: expiry
                .filter(|d| !d.is_zero())
                .map(|d| deadline_after(now, d)),
            dispatched: false,
            lease_deadline: None,
            lease_epoch: 0,
            settled_epoch: 0,
            awaiting_settlement: false,
            prev: None,
            next: None,
        }
    }

    /// Task id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Name of the queue holding the task.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Opaque payload.
    #[must_use]
    pub const fn content(&self) -> &Value {
        &self.content
    }

    /// Remaining retry budget; negative means exhausted.
    #[must_use]
    pub const fn retries_remaining(&self) -> i64 {
        self.retries_remaining
    }

    /// Configured lease length, `None` when leases never time out.
    #[must_use]
    pub const fn lease_duration(&self) -> Option<Duration> {
        self.lease_duration
    }

    /// Absolute expiry, `None` when the task never expires.
    #[must_use]
    pub const fn expiry_deadline(&self) -> Option<Instant> {
        self.expiry_deadline
    }

    /// Deadline of the current lease; `None` when not leased or unbounded.
    #[must_use]
    pub const fn lease_deadline(&self) -> Option<Instant> {
        self.lease_deadline
    }

    /// True while a consumer holds a lease.
    #[must_use]
    pub const fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    /// Epoch of the most recent lease (0 before the first dispatch).
    #[must_use]
    pub const fn lease_epoch(&self) -> u64 {
        self.lease_epoch
    }

    /// True once `now` reached the expiry deadline.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expiry_deadline.is_some_and(|d| d <= now)
    }

    /// Leased, unexpired, and the lease has not run out.
    #[must_use]
    pub fn in_dispatch(&self, now: Instant) -> bool {
        self.dispatched && !self.is_expired(now) && self.lease_deadline.is_none_or(|d| now < d)
    }

    /// Eligible to be handed to a consumer.
    ///
    /// A task whose lease timed out stays ineligible until the timeout has
    /// been charged against its retry budget.
    #[must_use]
    pub fn can_dispatch(&self, now: Instant) -> bool {
        !self.dispatched && !self.awaiting_settlement && !self.is_expired(now)
    }

    /// Leased and the lease deadline has passed.
    #[must_use]
    pub fn lease_timed_out(&self, now: Instant) -> bool {
        self.dispatched && self.lease_deadline.is_some_and(|d| d <= now) && !self.is_expired(now)
    }

    /// Start a new lease. Returns the new epoch.
    pub(crate) fn dispatch(&mut self, now: Instant) -> u64 {
        self.dispatched = true;
        self.lease_epoch += 1;
        self.lease_deadline = self.lease_duration.map(|d| deadline_after(now, d));
        self.lease_epoch
    }

    /// Drop the current lease.
    pub(crate) fn undispatch(&mut self) {
        self.dispatched = false;
        self.lease_deadline = None;
    }

    /// Lease expired in GC; hold the task back until the timeout is settled.
    pub(crate) fn mark_lease_timeout(&mut self) {
        self.undispatch();
        self.awaiting_settlement = true;
    }

    /// True when a failure for `epoch` has not been charged yet.
    #[must_use]
    pub const fn is_unsettled(&self, epoch: u64) -> bool {
        epoch > self.settled_epoch && epoch <= self.lease_epoch
    }

    /// Charge a failed or timed-out lease. Returns the remaining budget.
    pub(crate) fn charge_failure(&mut self, epoch: u64) -> i64 {
        self.settled_epoch = self.settled_epoch.max(epoch);
        self.awaiting_settlement = false;
        self.retries_remaining -= 1;
        self.retries_remaining
    }

    /// Forget the current lease without charging it (undeliverable match).
    pub(crate) fn release(&mut self) {
        self.undispatch();
        self.settled_epoch = self.lease_epoch;
        self.awaiting_settlement = false;
    }

    /// Consumer-facing view of the task.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            queue: self.queue.clone(),
            content: self.content.clone(),
            retries_remaining: self.retries_remaining,
            lease_epoch: self.lease_epoch,
        }
    }
}

/// Serializable view of a task handed to consumers and peekers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task id; the handle used for ack/fail.
    pub id: TaskId,
    /// Queue the task came from.
    pub queue: String,
    /// Opaque payload.
    pub content: Value,
    /// Remaining retry budget.
    pub retries_remaining: i64,
    /// Lease the snapshot was taken under. Not part of the wire format.
    #[serde(skip)]
    pub lease_epoch: u64,
}

impl TaskSnapshot {
    /// Key of the lease this snapshot was handed out with.
    #[must_use]
    pub const fn lease_key(&self) -> LeaseKey {
        LeaseKey {
            task: self.id,
            epoch: self.lease_epoch,
        }
    }
}

//! Lease tracking and the outcome rules applied by the event loop.
//!
//! Ack, fail and lease-timeout outcomes all travel as [`BrokerEvent`]s over
//! one channel. A single loop owned by the server drains that channel and
//! applies each outcome with [`apply_status`] while holding the shared lock.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::core::broker::{Broker, Lease, LeaseKey};
use crate::core::error::BrokerError;
use crate::core::ids::{TaskId, WaiterId};
use crate::core::scheduler::DeferredScheduler;
use crate::core::task::TaskStatus;

/// Message consumed by the server's event loop.
#[derive(Debug)]
pub enum BrokerEvent {
    /// Terminal outcome of a lease.
    Status(StatusEvent),
    /// A blocked wait ran out of time.
    WaitTimeout(WaiterId),
}

/// Outcome reported for one task.
#[derive(Debug)]
pub struct StatusEvent {
    /// Task the outcome refers to.
    pub task: TaskId,
    /// Reported status.
    pub status: TaskStatus,
    /// Lease the outcome belongs to. Consumer reports leave it unset and
    /// apply to the current lease.
    pub epoch: Option<u64>,
    /// Signalled once the outcome has been applied.
    pub reply: Option<oneshot::Sender<()>>,
}

impl StatusEvent {
    /// Lease-timeout event for `key`.
    #[must_use]
    pub const fn timeout(key: LeaseKey) -> Self {
        Self {
            task: key.task,
            status: TaskStatus::Timeout,
            epoch: Some(key.epoch),
            reply: None,
        }
    }
}

/// What [`apply_status`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Acknowledged and removed.
    Deleted,
    /// Budget charged and task put back at the tail.
    Requeued,
    /// Budget exhausted; task removed.
    Exhausted,
    /// Unknown task, stale lease, or task not in dispatch.
    Ignored,
}

impl Outcome {
    /// True when the outcome made a task available to waiters again.
    #[must_use]
    pub const fn frees_task(self) -> bool {
        matches!(self, Self::Requeued)
    }
}

/// Arms lease timers and forwards consumer outcomes to the event loop.
#[derive(Clone)]
pub struct LeaseTracker {
    scheduler: DeferredScheduler<BrokerEvent>,
    events: mpsc::UnboundedSender<BrokerEvent>,
}

impl LeaseTracker {
    /// Tracker feeding `events`, with timers driven by `scheduler`.
    #[must_use]
    pub const fn new(
        scheduler: DeferredScheduler<BrokerEvent>,
        events: mpsc::UnboundedSender<BrokerEvent>,
    ) -> Self {
        Self { scheduler, events }
    }

    /// Schedule the timeout of a freshly granted lease. Unbounded leases are
    /// not tracked.
    pub fn arm(&self, lease: &Lease) -> Result<(), BrokerError> {
        match lease.deadline {
            Some(deadline) => self.scheduler.schedule(
                BrokerEvent::Status(StatusEvent::timeout(lease.key)),
                deadline,
            ),
            None => Ok(()),
        }
    }

    /// Forward an acknowledgement. The receiver fires once it is applied.
    pub fn ack(&self, task: TaskId) -> Result<oneshot::Receiver<()>, BrokerError> {
        self.report(task, TaskStatus::Ok)
    }

    /// Forward a failure report. The receiver fires once it is applied.
    pub fn fail(&self, task: TaskId) -> Result<oneshot::Receiver<()>, BrokerError> {
        self.report(task, TaskStatus::Fail)
    }

    /// Wake `waiter` with whatever it can take once `delay` elapses.
    pub fn schedule_wait_timeout(
        &self,
        waiter: WaiterId,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        self.scheduler
            .schedule_after(BrokerEvent::WaitTimeout(waiter), delay)
    }

    fn report(
        &self,
        task: TaskId,
        status: TaskStatus,
    ) -> Result<oneshot::Receiver<()>, BrokerError> {
        let (reply, done) = oneshot::channel();
        self.events
            .send(BrokerEvent::Status(StatusEvent {
                task,
                status,
                epoch: None,
                reply: Some(reply),
            }))
            .map_err(|_| BrokerError::Shutdown)?;
        Ok(done)
    }
}

/// Apply one outcome to the broker.
///
/// Ack and fail only count while the task is in dispatch. A timeout counts
/// once per lease epoch, whether it arrives from the scheduler or from a GC
/// sweep that noticed the deadline first.
pub fn apply_status(
    broker: &mut Broker,
    task: TaskId,
    status: TaskStatus,
    epoch: Option<u64>,
    now: Instant,
) -> Outcome {
    match status {
        TaskStatus::Ok => {
            if broker.find(task, now).is_some_and(|t| t.in_dispatch(now)) {
                broker.delete_task(task);
                tracing::debug!(task_id = %task, "task acknowledged");
                Outcome::Deleted
            } else {
                Outcome::Ignored
            }
        }
        TaskStatus::Fail => {
            let current = match broker.find(task, now) {
                Some(t) if t.in_dispatch(now) => t.lease_epoch(),
                _ => return Outcome::Ignored,
            };
            settle_failure(broker, task, epoch.unwrap_or(current))
        }
        TaskStatus::Timeout => {
            let Some(epoch) = epoch else {
                return Outcome::Ignored;
            };
            let early = broker
                .get(task)
                .is_some_and(|t| t.lease_epoch() == epoch && t.in_dispatch(now));
            if early {
                // GC settles it once the lease actually lapses.
                return Outcome::Ignored;
            }
            settle_failure(broker, task, epoch)
        }
    }
}

/// Charge a failed or timed-out lease and requeue or delete the task.
pub fn settle_failure(broker: &mut Broker, id: TaskId, epoch: u64) -> Outcome {
    let Some(task) = broker.get(id) else {
        return Outcome::Ignored;
    };
    if epoch != task.lease_epoch() {
        return Outcome::Ignored;
    }
    let Some(remaining) = broker.charge(id, epoch) else {
        return Outcome::Ignored;
    };
    if remaining < 0 {
        broker.delete_task(id);
        tracing::warn!(task_id = %id, epoch, "retries exhausted, task dropped");
        Outcome::Exhausted
    } else {
        broker.requeue(id);
        tracing::info!(task_id = %id, epoch, remaining, "task requeued");
        Outcome::Requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::Task;
    use serde_json::json;

    fn broker_with(retries: u32, lease: u64, now: Instant) -> (Broker, TaskId) {
        let mut mq = Broker::new();
        let id = TaskId::from_u128(1);
        mq.add(Task::new(
            id,
            "q",
            json!("job"),
            retries,
            Some(Duration::from_secs(lease)),
            None,
            now,
        ))
        .unwrap();
        (mq, id)
    }

    #[test]
    fn ack_deletes_only_in_dispatch() {
        let now = Instant::now();
        let (mut mq, id) = broker_with(1, 10, now);
        assert_eq!(apply_status(&mut mq, id, TaskStatus::Ok, None, now), Outcome::Ignored);
        mq.dispatch(id, now).unwrap();
        assert_eq!(apply_status(&mut mq, id, TaskStatus::Ok, None, now), Outcome::Deleted);
        assert!(!mq.contains(id));
        assert_eq!(apply_status(&mut mq, id, TaskStatus::Ok, None, now), Outcome::Ignored);
    }

    #[test]
    fn fail_requeues_then_exhausts() {
        let now = Instant::now();
        let (mut mq, id) = broker_with(1, 10, now);
        mq.dispatch(id, now).unwrap();
        assert_eq!(apply_status(&mut mq, id, TaskStatus::Fail, None, now), Outcome::Requeued);
        assert_eq!(mq.get(id).unwrap().retries_remaining(), 0);
        assert!(!mq.get(id).unwrap().is_dispatched());

        mq.dispatch(id, now).unwrap();
        assert_eq!(apply_status(&mut mq, id, TaskStatus::Fail, None, now), Outcome::Exhausted);
        assert!(!mq.contains(id));
    }

    #[test]
    fn timeout_is_charged_once_per_epoch() {
        let now = Instant::now();
        let (mut mq, id) = broker_with(3, 5, now);
        let lease = mq.dispatch(id, now).unwrap();
        let later = now + Duration::from_secs(5);

        // GC notices first and settles; the scheduler's copy is then stale.
        mq.gc(later);
        for key in mq.take_lease_timeouts() {
            settle_failure(&mut mq, key.task, key.epoch);
        }
        let ev = StatusEvent::timeout(lease.key);
        assert_eq!(
            apply_status(&mut mq, ev.task, ev.status, ev.epoch, later),
            Outcome::Ignored
        );
        assert_eq!(mq.get(id).unwrap().retries_remaining(), 2);
    }

    #[test]
    fn early_timeout_delivery_is_ignored() {
        let now = Instant::now();
        let (mut mq, id) = broker_with(3, 5, now);
        let lease = mq.dispatch(id, now).unwrap();
        let ev = StatusEvent::timeout(lease.key);
        let outcome = apply_status(&mut mq, ev.task, ev.status, ev.epoch, now + Duration::from_secs(4));
        assert_eq!(outcome, Outcome::Ignored);
        assert!(mq.get(id).unwrap().is_dispatched());
    }

    #[test]
    fn fail_after_lease_lapsed_is_ignored() {
        let now = Instant::now();
        let (mut mq, id) = broker_with(3, 5, now);
        mq.dispatch(id, now).unwrap();
        let later = now + Duration::from_secs(6);
        assert_eq!(apply_status(&mut mq, id, TaskStatus::Fail, None, later), Outcome::Ignored);
        // The lapse itself is still charged exactly once.
        let keys = mq.take_lease_timeouts();
        assert_eq!(keys.len(), 1);
        assert_eq!(settle_failure(&mut mq, id, keys[0].epoch), Outcome::Requeued);
        assert_eq!(mq.get(id).unwrap().retries_remaining(), 2);
    }

    #[test]
    fn superseded_lease_is_not_charged() {
        let now = Instant::now();
        let (mut mq, id) = broker_with(3, 0, now);
        let first = mq.dispatch(id, now).unwrap();
        assert!(mq.release(first.key));
        mq.dispatch(id, now).unwrap();
        assert_eq!(settle_failure(&mut mq, id, first.key.epoch), Outcome::Ignored);
        let t = mq.get(id).unwrap();
        assert!(t.is_dispatched());
        assert_eq!(t.retries_remaining(), 3);
    }
}

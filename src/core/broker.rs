//! Broker aggregate: task table, queues, and the expiry and lease indexes.
//!
//! Every method expects the caller to hold the server's shared lock. The
//! broker itself never locks and never notifies waiters; call sites decide
//! when to re-run matching.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::deadline::DeadlineQueue;
use crate::core::error::BrokerError;
use crate::core::ids::TaskId;
use crate::core::queue::{Cursor, Queue, TaskTable};
use crate::core::task::{Task, TaskSnapshot};

/// Longest accepted queue name, in bytes.
pub const MAX_QUEUE_NAME_LEN: usize = 255;

/// Heap entries tolerated beyond live entries before compaction.
const COMPACT_SLACK: usize = 64;

/// Identifies one specific lease of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    /// Leased task.
    pub task: TaskId,
    /// Lease epoch at dispatch time.
    pub epoch: u64,
}

/// A lease granted by [`Broker::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    /// Task and epoch.
    pub key: LeaseKey,
    /// When the lease runs out; `None` for unbounded leases.
    pub deadline: Option<Instant>,
}

/// Outcome of one garbage-collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Tasks deleted because their expiry passed.
    pub expired: usize,
    /// Leases found timed out and undispatched.
    pub lease_timeouts: usize,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    /// Live tasks.
    pub tasks: usize,
    /// Tasks currently leased.
    pub dispatched: usize,
    /// Known queues, empty ones included.
    pub queues: usize,
    /// Consumers blocked in wait.
    pub pending_waiters: usize,
}

/// Reject names that cannot round-trip through a URL path segment.
pub fn validate_queue_name(name: &str) -> Result<(), BrokerError> {
    if name.is_empty()
        || name.len() > MAX_QUEUE_NAME_LEN
        || name.chars().any(|c| c == '/' || c.is_whitespace() || c.is_control())
    {
        return Err(BrokerError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

/// In-memory message queue.
#[derive(Default)]
pub struct Broker {
    tasks: TaskTable,
    queues: HashMap<String, Queue>,
    by_expiry: DeadlineQueue<TaskId>,
    by_lease: DeadlineQueue<LeaseKey>,
    lease_timeouts: Vec<LeaseKey>,
}

impl Broker {
    /// Empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and append it to its queue, creating the queue lazily.
    pub fn add(&mut self, task: Task) -> Result<TaskId, BrokerError> {
        validate_queue_name(task.queue())?;
        let id = task.id();
        if self.tasks.contains_key(&id) {
            return Err(BrokerError::DuplicateId(id));
        }
        let name = task.queue().to_string();
        if let Some(deadline) = task.expiry_deadline() {
            self.by_expiry.push(deadline, id);
        }
        self.tasks.insert(id, task);
        self.queues
            .entry(name.clone())
            .or_insert_with(|| Queue::new(name))
            .enqueue(&mut self.tasks, id);
        Ok(id)
    }

    /// Lease `id` to a consumer and move it to the back of its queue.
    ///
    /// Runs a GC pass first. Returns `None` when the task is gone or not
    /// currently dispatchable.
    pub fn dispatch(&mut self, id: TaskId, now: Instant) -> Option<Lease> {
        self.gc(now);
        let task = self.tasks.get_mut(&id)?;
        if !task.can_dispatch(now) {
            return None;
        }
        let epoch = task.dispatch(now);
        let deadline = task.lease_deadline();
        let key = LeaseKey { task: id, epoch };
        if let Some(deadline) = deadline {
            self.by_lease.push(deadline, key);
        }
        let name = task.queue().to_string();
        if let Some(queue) = self.queues.get_mut(&name) {
            queue.move_to_back(&mut self.tasks, id);
        }
        tracing::debug!(task_id = %id, queue = %name, epoch, "task dispatched");
        Some(Lease { key, deadline })
    }

    /// GC, then look up `id`.
    pub fn find(&mut self, id: TaskId, now: Instant) -> Option<&Task> {
        self.gc(now);
        self.tasks.get(&id)
    }

    /// Look up `id` without collecting.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// True if `id` is live.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Delete expired tasks, then undispatch leases whose deadline passed.
    ///
    /// Timed-out leases are buffered for [`Broker::take_lease_timeouts`]; the
    /// retry budget is left to whoever settles them.
    pub fn gc(&mut self, now: Instant) -> GcReport {
        let mut report = GcReport::default();

        while let Some(id) = self.by_expiry.pop_due(now) {
            if self.tasks.get(&id).is_some_and(|t| t.is_expired(now)) {
                self.delete_task(id);
                report.expired += 1;
                tracing::info!(task_id = %id, "task expired");
            }
        }

        while let Some((deadline, key)) = self.by_lease.peek() {
            if deadline > now {
                break;
            }
            let key = *key;
            self.by_lease.pop();
            let Some(task) = self.tasks.get_mut(&key.task) else {
                continue;
            };
            if task.lease_epoch() != key.epoch || !task.lease_timed_out(now) {
                continue;
            }
            task.mark_lease_timeout();
            self.lease_timeouts.push(key);
            report.lease_timeouts += 1;
            tracing::info!(task_id = %key.task, epoch = key.epoch, "lease timed out");
        }

        self.compact();
        report
    }

    /// Drain leases that GC found timed out since the last call.
    pub fn take_lease_timeouts(&mut self) -> Vec<LeaseKey> {
        std::mem::take(&mut self.lease_timeouts)
    }

    /// Remove a task from every structure. Heap entries are dropped lazily.
    pub fn delete_task(&mut self, id: TaskId) -> Option<Task> {
        let name = self.tasks.get(&id)?.queue().to_string();
        if let Some(queue) = self.queues.get_mut(&name) {
            queue.remove(&mut self.tasks, id);
        }
        self.tasks.remove(&id)
    }

    /// Consumer gave up on the task: end the lease now, keep queue position.
    pub fn failed(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if task.is_dispatched() => {
                task.undispatch();
                true
            }
            _ => false,
        }
    }

    /// End the lease and move the task to the back of its queue.
    pub fn requeue(&mut self, id: TaskId) {
        self.failed(id);
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        let name = task.queue().to_string();
        if let Some(queue) = self.queues.get_mut(&name) {
            queue.move_to_back(&mut self.tasks, id);
        }
    }

    /// Charge a failed lease to the retry budget. Returns the remaining
    /// budget, or `None` if `epoch` was already settled or the task is gone.
    pub fn charge(&mut self, id: TaskId, epoch: u64) -> Option<i64> {
        let task = self.tasks.get_mut(&id)?;
        if !task.is_unsettled(epoch) {
            return None;
        }
        Some(task.charge_failure(epoch))
    }

    /// Hand the lease `key` back without charging it. Returns false when
    /// that lease is no longer the live one.
    pub fn release(&mut self, key: LeaseKey) -> bool {
        match self.tasks.get_mut(&key.task) {
            Some(task) if task.is_dispatched() && task.lease_epoch() == key.epoch => {
                task.release();
                true
            }
            _ => false,
        }
    }

    /// First dispatchable task of `queue` at or after `from`.
    #[must_use]
    pub fn next_undispatched(
        &self,
        queue: &str,
        from: Cursor,
        now: Instant,
    ) -> Option<(TaskId, Cursor)> {
        self.queues
            .get(queue)?
            .next_undispatched(&self.tasks, from, now)
    }

    /// Up to `n` dispatchable tasks of `queue`, head first, without leasing.
    /// Runs no GC: a task whose lease lapsed stays hidden until settled.
    #[must_use]
    pub fn peek(&self, queue: &str, n: usize, now: Instant) -> Vec<TaskSnapshot> {
        let Some(q) = self.queues.get(queue) else {
            return Vec::new();
        };
        q.undispatched(&self.tasks, n, now)
            .into_iter()
            .filter_map(|id| self.tasks.get(&id).map(Task::snapshot))
            .collect()
    }

    /// Queue by name.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    /// Ids linked in `queue`, head to tail.
    #[must_use]
    pub fn queue_ids(&self, queue: &str) -> Vec<TaskId> {
        self.queues
            .get(queue)
            .map(|q| q.ids(&self.tasks))
            .unwrap_or_default()
    }

    /// Known queue names, sorted.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Drop queues holding no tasks. Returns how many were removed.
    pub fn prune_empty_queues(&mut self) -> usize {
        let before = self.queues.len();
        self.queues.retain(|_, q| !q.is_empty());
        before - self.queues.len()
    }

    /// Number of live tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of leased tasks.
    #[must_use]
    pub fn dispatched_count(&self) -> usize {
        self.tasks.values().filter(|t| t.is_dispatched()).count()
    }

    /// Counters; `pending_waiters` is left at zero for the caller to fill.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            tasks: self.tasks.len(),
            dispatched: self.dispatched_count(),
            queues: self.queues.len(),
            pending_waiters: 0,
        }
    }

    fn compact(&mut self) {
        let limit = self.tasks.len() * 2 + COMPACT_SLACK;
        if self.by_expiry.len() > limit {
            let tasks = &self.tasks;
            self.by_expiry.retain(|deadline, id| {
                tasks
                    .get(id)
                    .is_some_and(|t| t.expiry_deadline() == Some(deadline))
            });
        }
        if self.by_lease.len() > limit {
            let tasks = &self.tasks;
            self.by_lease.retain(|_, key| {
                tasks
                    .get(&key.task)
                    .is_some_and(|t| t.is_dispatched() && t.lease_epoch() == key.epoch)
            });
        }
    }

    #[cfg(test)]
    fn heap_sizes(&self) -> (usize, usize) {
        (self.by_expiry.len(), self.by_lease.len())
    }
}

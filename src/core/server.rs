//! The queue server: one lock around broker and waiters, plus the background
//! loops that drive outcomes, timers and periodic GC.
//!
//! Locking follows two rules. Every mutation of broker or waiter state
//! happens under `Shared::inner`, inside a synchronous method, so no guard
//! ever lives across an `.await`. Lease timers are armed after the guard is
//! released; the timer task only talks to the event loop through channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::BrokerConfig;
use crate::core::broker::{validate_queue_name, Broker, BrokerStats, GcReport, Lease};
use crate::core::error::BrokerError;
use crate::core::ids::{IdSource, RandomIdSource, TaskId, WaiterId};
use crate::core::lease::{apply_status, settle_failure, BrokerEvent, LeaseTracker, StatusEvent};
use crate::core::scheduler::{DeferredScheduler, Spawn};
use crate::core::task::{Task, TaskSnapshot, TaskSpec};
use crate::core::waiter::{Admission, WaitResult, WaitTimeout, WaiterRegistry};
use crate::util::clock;

/// State guarded by the shared lock.
#[derive(Default)]
struct Inner {
    broker: Broker,
    waiters: WaiterRegistry,
}

impl Inner {
    /// Charge leases that GC found timed out. Returns true if any task
    /// became available again.
    fn settle(&mut self) -> bool {
        let mut freed = false;
        loop {
            let keys = self.broker.take_lease_timeouts();
            if keys.is_empty() {
                return freed;
            }
            for key in keys {
                freed |= settle_failure(&mut self.broker, key.task, key.epoch).frees_task();
            }
        }
    }

    /// Settle lapsed leases before reading, so peek sees what the next wait
    /// would.
    fn peek(&mut self, queue: &str, n: usize, now: Instant) -> (Vec<TaskSnapshot>, Vec<Lease>) {
        let leases = self.rematch(now);
        (self.broker.peek(queue, n, now), leases)
    }

    fn sweep(&mut self, now: Instant) -> (GcReport, bool) {
        let report = self.broker.gc(now);
        let freed = self.settle();
        (report, freed)
    }

    /// GC, then offer available tasks to pending waiters until nothing moves.
    fn rematch(&mut self, now: Instant) -> Vec<Lease> {
        let mut leases = Vec::new();
        self.sweep(now);
        loop {
            if self.waiters.is_empty() {
                return leases;
            }
            leases.extend(self.waiters.update(&mut self.broker, now));
            if !self.settle() {
                return leases;
            }
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    leases: LeaseTracker,
    ids: Arc<dyn IdSource>,
    config: BrokerConfig,
    shutdown: AtomicBool,
    stop: watch::Sender<bool>,
}

impl Shared {
    fn ensure_running(&self) -> Result<(), BrokerError> {
        if self.shutdown.load(Ordering::Acquire) {
            Err(BrokerError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn arm(&self, leases: Vec<Lease>) {
        for lease in leases {
            if let Err(err) = self.leases.arm(&lease) {
                tracing::debug!(task_id = %lease.key.task, error = %err, "lease timer not armed");
            }
        }
    }

    fn allocate_id(&self, broker: &Broker) -> Result<TaskId, BrokerError> {
        let attempts = self.config.max_id_attempts;
        for _ in 0..attempts {
            let id = self.ids.next_id();
            if !broker.contains(id) {
                return Ok(id);
            }
            tracing::debug!(task_id = %id, "generated id already live, retrying");
        }
        tracing::error!(attempts, "id allocation exhausted");
        Err(BrokerError::IdExhausted { attempts })
    }

    fn enqueue(&self, queue: &str, spec: TaskSpec) -> Result<TaskId, BrokerError> {
        self.ensure_running()?;
        validate_queue_name(queue)?;
        let TaskSpec {
            content,
            retries,
            lease,
            expiry,
            id,
        } = spec;
        let retries = retries.unwrap_or(self.config.default_retries);
        let lease = lease.unwrap_or_else(|| self.config.default_lease());
        let expiry = expiry.unwrap_or_else(|| self.config.default_expiry());
        let now = clock::now();

        let (id, leases) = {
            let mut inner = self.inner.lock();
            inner.sweep(now);
            let id = match id {
                Some(id) if inner.broker.contains(id) => return Err(BrokerError::DuplicateId(id)),
                Some(id) => id,
                None => self.allocate_id(&inner.broker)?,
            };
            let task = Task::new(id, queue, content, retries, Some(lease), Some(expiry), now);
            inner.broker.add(task)?;
            tracing::debug!(task_id = %id, queue, retries, "task enqueued");
            (id, inner.rematch(now))
        };
        self.arm(leases);
        Ok(id)
    }

    fn admit(
        &self,
        queues: Vec<String>,
        timeout: WaitTimeout,
        reply: oneshot::Sender<WaitResult>,
    ) -> Result<Option<WaiterId>, BrokerError> {
        let now = clock::now();
        let (admission, mut leases) = {
            let mut inner = self.inner.lock();
            // Checked under the lock so shutdown cannot miss this waiter.
            self.ensure_running()?;
            // Older waiters get first pick of anything freed since the last pass.
            let mut leases = inner.rematch(now);
            let Inner { broker, waiters } = &mut *inner;
            let admission = waiters.add_waiter(broker, queues, timeout, reply, now)?;
            if inner.settle() {
                leases.extend(inner.rematch(now));
            }
            (admission, leases)
        };
        let parked = match admission {
            Admission::Finalized(done) => {
                leases.extend(done.leases);
                None
            }
            Admission::Pending(id) => Some(id),
        };
        self.arm(leases);
        Ok(parked)
    }

    fn cancel_wait(&self, id: WaiterId) {
        if self.inner.lock().waiters.remove(id).is_some() {
            tracing::debug!(waiter = %id, "wait abandoned");
        }
    }

    /// Hand back tasks a dropped wait had already been given, then offer
    /// them to the remaining waiters.
    fn release_abandoned(&self, slots: &WaitResult) {
        let keys: Vec<_> = slots.iter().flatten().map(TaskSnapshot::lease_key).collect();
        if keys.is_empty() {
            return;
        }
        let now = clock::now();
        let leases = {
            let mut inner = self.inner.lock();
            let released = keys
                .into_iter()
                .filter(|key| inner.broker.release(*key))
                .count();
            tracing::debug!(released, "abandoned wait result handed back");
            if released == 0 {
                return;
            }
            inner.rematch(now)
        };
        self.arm(leases);
    }

    fn handle_event(&self, event: BrokerEvent) {
        let now = clock::now();
        let mut reply = None;
        let leases = {
            let mut inner = self.inner.lock();
            match event {
                BrokerEvent::Status(StatusEvent {
                    task,
                    status,
                    epoch,
                    reply: done,
                }) => {
                    reply = done;
                    let outcome = apply_status(&mut inner.broker, task, status, epoch, now);
                    tracing::trace!(task_id = %task, ?status, ?outcome, "status applied");
                    let freed = inner.settle();
                    if outcome.frees_task() || freed {
                        inner.rematch(now)
                    } else {
                        Vec::new()
                    }
                }
                BrokerEvent::WaitTimeout(id) => {
                    let Inner { broker, waiters } = &mut *inner;
                    match waiters.expire(broker, id, now) {
                        Ok(Some(done)) if done.delivered => {
                            let mut leases = done.leases;
                            if inner.settle() {
                                leases.extend(inner.rematch(now));
                            }
                            leases
                        }
                        Ok(Some(_)) => inner.rematch(now),
                        Ok(None) => Vec::new(),
                        Err(err) => {
                            tracing::error!(waiter = %id, error = %err, "wait timeout failed");
                            Vec::new()
                        }
                    }
                }
            }
        };
        self.arm(leases);
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    fn collect_garbage(&self) -> GcReport {
        let now = clock::now();
        let (report, leases) = {
            let mut inner = self.inner.lock();
            let (report, _) = inner.sweep(now);
            let pruned = inner.broker.prune_empty_queues();
            if pruned > 0 {
                tracing::debug!(pruned, "empty queues pruned");
            }
            (report, inner.rematch(now))
        };
        self.arm(leases);
        report
    }
}

/// Handle to a running broker. Clones share the same state.
#[derive(Clone)]
pub struct QueueServer {
    shared: Arc<Shared>,
}

impl QueueServer {
    /// Start a broker with random ids, running its loops on `spawner`.
    pub fn start<S: Spawn>(config: BrokerConfig, spawner: &S) -> Result<Self, BrokerError> {
        Self::start_with_ids(config, Arc::new(RandomIdSource), spawner)
    }

    /// Start a broker drawing ids from `ids`.
    pub fn start_with_ids<S: Spawn>(
        config: BrokerConfig,
        ids: Arc<dyn IdSource>,
        spawner: &S,
    ) -> Result<Self, BrokerError> {
        config.validate().map_err(BrokerError::Validation)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let scheduler = DeferredScheduler::spawn(spawner, events_tx.clone(), stop_rx.clone());
        let gc_every = config.gc_interval();

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::default()),
            leases: LeaseTracker::new(scheduler, events_tx),
            ids,
            config,
            shutdown: AtomicBool::new(false),
            stop,
        });

        spawner.spawn(event_loop(Arc::downgrade(&shared), events_rx, stop_rx.clone()));
        spawner.spawn(gc_loop(Arc::downgrade(&shared), gc_every, stop_rx));
        tracing::info!(gc_interval_secs = gc_every.as_secs(), "queue server started");
        Ok(Self { shared })
    }

    /// Broker settings in effect.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Add a task to `queue` and wake any waiter it completes.
    pub fn enqueue(&self, queue: &str, spec: TaskSpec) -> Result<TaskId, BrokerError> {
        self.shared.enqueue(queue, spec)
    }

    /// Block until one task per requested slot is leased, or the timeout
    /// passes and whatever matched by then is returned.
    ///
    /// Dropping the future abandons the wait; tasks matched after that are
    /// handed back to the queue.
    pub async fn wait(
        &self,
        queues: Vec<String>,
        timeout: WaitTimeout,
    ) -> Result<WaitResult, BrokerError> {
        self.shared.ensure_running()?;
        for name in &queues {
            validate_queue_name(name)?;
        }
        let (reply, result) = oneshot::channel();
        let parked = self.shared.admit(queues, timeout, reply)?;
        if let (Some(id), WaitTimeout::After(delay)) = (parked, timeout) {
            if let Err(err) = self.shared.leases.schedule_wait_timeout(id, delay) {
                tracing::debug!(waiter = %id, error = %err, "wait timeout not scheduled");
            }
        }
        let mut guard = WaitGuard {
            shared: &self.shared,
            waiter: parked,
            result,
        };
        let got = (&mut guard.result).await.map_err(|_| BrokerError::Shutdown);
        guard.waiter = None;
        got
    }

    /// Acknowledge a leased task. Unknown or no longer leased ids are ignored.
    pub async fn ack(&self, id: TaskId) -> Result<(), BrokerError> {
        self.shared.ensure_running()?;
        let applied = self.shared.leases.ack(id)?;
        applied.await.map_err(|_| BrokerError::Shutdown)
    }

    /// Report failure of a leased task. Unknown or no longer leased ids are
    /// ignored.
    pub async fn fail(&self, id: TaskId) -> Result<(), BrokerError> {
        self.shared.ensure_running()?;
        let applied = self.shared.leases.fail(id)?;
        applied.await.map_err(|_| BrokerError::Shutdown)
    }

    /// Known queue names, sorted.
    #[must_use]
    pub fn list_queues(&self) -> Vec<String> {
        self.shared.inner.lock().broker.queue_names()
    }

    /// Up to `n` dispatchable tasks of `queue`, without leasing them.
    /// Lapsed leases are settled first so their tasks show up.
    #[must_use]
    pub fn peek(&self, queue: &str, n: usize) -> Vec<TaskSnapshot> {
        let now = clock::now();
        let (tasks, leases) = self.shared.inner.lock().peek(queue, n, now);
        self.shared.arm(leases);
        tasks
    }

    /// Run a GC pass now, the same one the periodic loop runs.
    pub fn collect_garbage(&self) -> GcReport {
        self.shared.collect_garbage()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let inner = self.shared.inner.lock();
        BrokerStats {
            pending_waiters: inner.waiters.len(),
            ..inner.broker.stats()
        }
    }

    /// True once [`QueueServer::shutdown`] ran.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop the background loops and wake every pending waiter with
    /// [`BrokerError::Shutdown`]. Later calls fail with the same error.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shared.stop.send(true);
        let drained = self.shared.inner.lock().waiters.drain();
        tracing::info!(woken = drained.len(), "queue server shut down");
    }
}

/// Cleans up after a wait future dropped before it returned: removes the
/// parked waiter and hands back anything already delivered to it.
struct WaitGuard<'a> {
    shared: &'a Shared,
    waiter: Option<WaiterId>,
    result: oneshot::Receiver<WaitResult>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.shared.cancel_wait(id);
        }
        if let Ok(slots) = self.result.try_recv() {
            self.shared.release_abandoned(&slots);
        }
    }
}

async fn event_loop(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<BrokerEvent>,
    mut stop: watch::Receiver<bool>,
) {
    tracing::info!("event loop started");
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_event(event);
    }
    tracing::info!("event loop stopped");
}

async fn gc_loop(shared: Weak<Shared>, every: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(clock::deadline_after(clock::now(), every), every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let report = shared.collect_garbage();
        if report.expired > 0 || report.lease_timeouts > 0 {
            tracing::info!(
                expired = report.expired,
                lease_timeouts = report.lease_timeouts,
                "periodic gc"
            );
        }
    }
    tracing::debug!("gc loop stopped");
}

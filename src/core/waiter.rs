//! Pending consumers and the matching that wakes them.
//!
//! Waiters sit in arrival order in an intrusive list keyed by [`WaiterId`].
//! A waiter is claimed by removing it from the registry; whichever path
//! removes it (a successful match, its wait timeout, or cancellation) is the
//! only one that may finalize it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::core::broker::{Broker, Lease};
use crate::core::error::BrokerError;
use crate::core::ids::{TaskId, WaiterId};
use crate::core::queue::Cursor;
use crate::core::task::{Task, TaskSnapshot};

/// One entry per requested queue slot; `None` where nothing matched.
pub type WaitResult = Vec<Option<TaskSnapshot>>;

/// How long a consumer is willing to block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Take whatever matches right now, partial results included.
    Immediate,
    /// Block until every slot fills or the duration elapses.
    After(Duration),
    /// Block until every slot fills.
    Infinite,
}

impl WaitTimeout {
    /// Wire form: negative is infinite, zero is immediate, else milliseconds.
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        match u64::try_from(ms) {
            Err(_) => Self::Infinite,
            Ok(0) => Self::Immediate,
            Ok(ms) => Self::After(Duration::from_millis(ms)),
        }
    }
}

/// A blocked consume request.
#[derive(Debug)]
pub struct Waiter {
    id: WaiterId,
    queues: Vec<String>,
    reply: Option<oneshot::Sender<WaitResult>>,
    prev: Option<WaiterId>,
    next: Option<WaiterId>,
}

/// Result of finalizing a waiter.
#[derive(Debug, Default)]
pub struct Finalized {
    /// Leases granted; the caller arms their timers.
    pub leases: Vec<Lease>,
    /// False if the consumer had gone away and the tasks were released.
    pub delivered: bool,
}

/// What happened to a newly added waiter.
#[derive(Debug)]
pub enum Admission {
    /// Answered on the spot.
    Finalized(Finalized),
    /// Parked until a match or its timeout.
    Pending(WaiterId),
}

/// Fill every slot or nothing. Repeated names get distinct tasks.
#[must_use]
pub fn ready(broker: &Broker, queues: &[String], now: Instant) -> Option<Vec<TaskId>> {
    let mut cursors: HashMap<&str, Cursor> = HashMap::new();
    let mut matched = Vec::with_capacity(queues.len());
    for name in queues {
        let from = cursors.get(name.as_str()).copied().unwrap_or(Cursor::Head);
        let (id, next) = broker.next_undispatched(name, from, now)?;
        cursors.insert(name.as_str(), next);
        matched.push(id);
    }
    Some(matched)
}

/// Fill what can be filled now.
#[must_use]
pub fn take(broker: &Broker, queues: &[String], now: Instant) -> Vec<Option<TaskId>> {
    let mut cursors: HashMap<&str, Cursor> = HashMap::new();
    queues
        .iter()
        .map(|name| {
            let from = cursors.get(name.as_str()).copied().unwrap_or(Cursor::Head);
            let (id, next) = broker.next_undispatched(name, from, now)?;
            cursors.insert(name.as_str(), next);
            Some(id)
        })
        .collect()
}

/// Lease the matched tasks and hand them to the waiter.
///
/// If the consumer already dropped its receiver the leases are released
/// without touching retry budgets.
pub fn finalize(
    broker: &mut Broker,
    waiter: &mut Waiter,
    matched: Vec<Option<TaskId>>,
    now: Instant,
) -> Result<Finalized, BrokerError> {
    debug_assert!(waiter.reply.is_some(), "waiter {} finalized twice", waiter.id);
    let Some(reply) = waiter.reply.take() else {
        tracing::error!(waiter = %waiter.id, "waiter finalized twice");
        return Err(BrokerError::Internal(format!(
            "waiter {} finalized twice",
            waiter.id
        )));
    };

    let mut leases = Vec::with_capacity(matched.len());
    let mut result = Vec::with_capacity(matched.len());
    for slot in matched {
        let granted = slot.and_then(|id| broker.dispatch(id, now));
        match granted {
            Some(lease) => {
                result.push(broker.get(lease.key.task).map(Task::snapshot));
                leases.push(lease);
            }
            None => result.push(None),
        }
    }

    if reply.send(result).is_err() {
        for lease in &leases {
            broker.release(lease.key);
        }
        tracing::debug!(waiter = %waiter.id, released = leases.len(), "waiter gone, tasks released");
        return Ok(Finalized {
            leases: Vec::new(),
            delivered: false,
        });
    }
    tracing::debug!(waiter = %waiter.id, leased = leases.len(), "waiter finalized");
    Ok(Finalized {
        leases,
        delivered: true,
    })
}

/// FIFO registry of pending waiters.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: HashMap<WaiterId, Waiter>,
    head: Option<WaiterId>,
    tail: Option<WaiterId>,
    next_id: u64,
}

impl WaiterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// True when nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// True if `id` is still pending (unclaimed).
    #[must_use]
    pub fn contains(&self, id: WaiterId) -> bool {
        self.waiters.contains_key(&id)
    }

    /// Pending ids, oldest first.
    #[must_use]
    pub fn ids(&self) -> Vec<WaiterId> {
        let mut ids = Vec::with_capacity(self.waiters.len());
        let mut current = self.head;
        while let Some(id) = current {
            ids.push(id);
            current = self.waiters.get(&id).and_then(|w| w.next);
        }
        ids
    }

    /// Serve a new consume request, immediately if possible.
    ///
    /// Immediate requests are always answered now with a partial match.
    /// Others are answered now only if every slot fills; otherwise they are
    /// parked at the back of the line.
    pub fn add_waiter(
        &mut self,
        broker: &mut Broker,
        queues: Vec<String>,
        timeout: WaitTimeout,
        reply: oneshot::Sender<WaitResult>,
        now: Instant,
    ) -> Result<Admission, BrokerError> {
        let id = WaiterId(self.next_id);
        self.next_id += 1;
        let mut waiter = Waiter {
            id,
            queues,
            reply: Some(reply),
            prev: None,
            next: None,
        };

        let matched = match timeout {
            WaitTimeout::Immediate => Some(take(broker, &waiter.queues, now)),
            _ => ready(broker, &waiter.queues, now)
                .map(|ids| ids.into_iter().map(Some).collect()),
        };
        match matched {
            Some(matched) => finalize(broker, &mut waiter, matched, now).map(Admission::Finalized),
            None => {
                tracing::debug!(waiter = %id, queues = ?waiter.queues, "waiter parked");
                self.append(waiter);
                Ok(Admission::Pending(id))
            }
        }
    }

    /// Re-run matching for every pending waiter, oldest first.
    ///
    /// Each waiter is finalized the moment all of its slots fill. Tasks
    /// released by vanished consumers are offered again in a further pass.
    pub fn update(&mut self, broker: &mut Broker, now: Instant) -> Vec<Lease> {
        let mut leases = Vec::new();
        loop {
            let mut released = false;
            for id in self.ids() {
                let matched = match self.waiters.get(&id) {
                    Some(w) => ready(broker, &w.queues, now),
                    None => None,
                };
                let Some(matched) = matched else {
                    continue;
                };
                let Some(mut waiter) = self.remove(id) else {
                    continue;
                };
                match finalize(broker, &mut waiter, matched.into_iter().map(Some).collect(), now) {
                    Ok(done) => {
                        released |= !done.delivered;
                        leases.extend(done.leases);
                    }
                    Err(err) => tracing::error!(waiter = %id, error = %err, "finalize failed"),
                }
            }
            if !released {
                return leases;
            }
        }
    }

    /// Wait timeout path: claim the waiter and hand it a partial match.
    ///
    /// Returns `None` if the waiter was already claimed.
    pub fn expire(
        &mut self,
        broker: &mut Broker,
        id: WaiterId,
        now: Instant,
    ) -> Result<Option<Finalized>, BrokerError> {
        let Some(mut waiter) = self.remove(id) else {
            return Ok(None);
        };
        let matched = take(broker, &waiter.queues, now);
        tracing::debug!(waiter = %id, "wait timed out");
        finalize(broker, &mut waiter, matched, now).map(Some)
    }

    /// Unlink and return a pending waiter, claiming it.
    pub fn remove(&mut self, id: WaiterId) -> Option<Waiter> {
        let mut waiter = self.waiters.remove(&id)?;
        let (prev, next) = (waiter.prev.take(), waiter.next.take());
        match prev {
            Some(p) => {
                if let Some(w) = self.waiters.get_mut(&p) {
                    w.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(w) = self.waiters.get_mut(&n) {
                    w.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        Some(waiter)
    }

    /// Claim every pending waiter. Dropping them wakes their callers with a
    /// closed channel.
    pub fn drain(&mut self) -> Vec<Waiter> {
        self.head = None;
        self.tail = None;
        self.waiters.drain().map(|(_, w)| w).collect()
    }

    fn append(&mut self, mut waiter: Waiter) {
        let id = waiter.id;
        waiter.prev = self.tail;
        waiter.next = None;
        match self.tail {
            Some(tail) => {
                if let Some(w) = self.waiters.get_mut(&tail) {
                    w.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.waiters.insert(id, waiter);
    }
}

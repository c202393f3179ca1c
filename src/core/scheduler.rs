//! Deferred event delivery on a single timer.
//!
//! [`DeferredScheduler`] accepts "deliver `T` no earlier than `deadline`"
//! requests and forwards payloads to one output channel in deadline order.
//! One background task owns the heap and one `tokio::time::Sleep`; there is
//! no timer per pending event and no cancellation. Receivers are expected to
//! re-check state on delivery and drop stale payloads.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use crate::core::deadline::DeadlineQueue;
use crate::core::error::BrokerError;
use crate::util::clock::{deadline_after, FAR_FUTURE};

/// Abstraction for spawning background work on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

type Request<T> = (T, Instant);

/// Handle used to schedule payloads. Cheap to clone.
pub struct DeferredScheduler<T> {
    requests: mpsc::UnboundedSender<Request<T>>,
}

impl<T> Clone for DeferredScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
        }
    }
}

impl<T: Send + 'static> DeferredScheduler<T> {
    /// Start the delivery loop on `spawner`.
    ///
    /// The loop ends when `shutdown` flips, when every handle is dropped, or
    /// when `output` is closed.
    pub fn spawn<S: Spawn>(
        spawner: &S,
        output: mpsc::UnboundedSender<T>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        spawner.spawn(run(rx, output, shutdown));
        Self { requests }
    }

    /// Deliver `payload` at or after `deadline`. Past deadlines fire at once.
    pub fn schedule(&self, payload: T, deadline: Instant) -> Result<(), BrokerError> {
        self.requests
            .send((payload, deadline))
            .map_err(|_| BrokerError::Shutdown)
    }

    /// Deliver `payload` once `delay` has elapsed.
    pub fn schedule_after(&self, payload: T, delay: Duration) -> Result<(), BrokerError> {
        self.schedule(payload, deadline_after(Instant::now(), delay))
    }
}

async fn run<T>(
    mut requests: mpsc::UnboundedReceiver<Request<T>>,
    output: mpsc::UnboundedSender<T>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending: DeadlineQueue<T> = DeadlineQueue::new();
    let timer = sleep_until(Instant::now() + FAR_FUTURE);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            req = requests.recv() => match req {
                Some((payload, deadline)) => pending.push(deadline, payload),
                None => break,
            },
            () = &mut timer, if !pending.is_empty() => {}
        }

        let now = Instant::now();
        while let Some(payload) = pending.pop_due(now) {
            if output.send(payload).is_err() {
                tracing::debug!("scheduler output closed");
                return;
            }
        }
        if let Some(next) = pending.next_deadline() {
            timer.as_mut().reset(next);
        }
    }
    tracing::debug!(dropped = pending.len(), "scheduler stopped");
}

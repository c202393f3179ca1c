//! Deadline-ordered min-heap shared by the scheduler, expiry and lease indexes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

/// Heap entry. Ordered so that `BinaryHeap` (a max-heap) pops the earliest
/// deadline first, FIFO among equal deadlines.
struct Entry<T> {
    deadline: Instant,
    seq: u64,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: earlier deadline, then earlier insertion, is "greater".
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of `(payload, deadline)` pairs.
///
/// There is no removal by key. Owners that need cancellation leave the entry
/// in place and discard it when it surfaces (see [`DeadlineQueue::retain`] for
/// bulk compaction).
pub struct DeadlineQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> DeadlineQueue<T> {
    /// Empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Insert a payload due at `deadline`. O(log n).
    pub fn push(&mut self, deadline: Instant, payload: T) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(Entry {
            deadline,
            seq,
            payload,
        });
    }

    /// Earliest deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Earliest entry without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<(Instant, &T)> {
        self.heap.peek().map(|e| (e.deadline, &e.payload))
    }

    /// Remove and return the earliest entry.
    pub fn pop(&mut self) -> Option<(Instant, T)> {
        self.heap.pop().map(|e| (e.deadline, e.payload))
    }

    /// Pop the earliest payload if its deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        if self.next_deadline()? <= now {
            self.pop().map(|(_, payload)| payload)
        } else {
            None
        }
    }

    /// Keep only entries for which `keep` returns true. O(n).
    pub fn retain(&mut self, mut keep: impl FnMut(Instant, &T) -> bool) {
        self.heap.retain(|e| keep(e.deadline, &e.payload));
    }

    /// Number of entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when no entries are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for DeadlineQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

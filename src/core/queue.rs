//! Named FIFO of tasks, linked through the broker's task table.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::core::ids::TaskId;
use crate::core::task::Task;

/// Task table the queue links point into.
pub type TaskTable = HashMap<TaskId, Task>;

/// Scan position inside a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Start of the queue.
    Head,
    /// At a specific task (inclusive).
    At(TaskId),
    /// Past the tail; nothing left to scan.
    End,
}

impl Cursor {
    fn from_link(link: Option<TaskId>) -> Self {
        link.map_or(Self::End, Self::At)
    }
}

/// Ordered, named collection of tasks.
///
/// Insertion order is delivery order. The queue stores only head/tail ids;
/// each task carries its own `prev`/`next` links, which makes append and
/// remove O(1) given the task id.
#[derive(Debug, Clone)]
pub struct Queue {
    name: String,
    head: Option<TaskId>,
    tail: Option<TaskId>,
    len: usize,
}

impl Queue {
    /// Empty queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of linked tasks, dispatched ones included.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when no task is linked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Id of the first task.
    #[must_use]
    pub const fn head(&self) -> Option<TaskId> {
        self.head
    }

    /// Append `id` at the tail. The task must be in `tasks` and unlinked.
    pub fn enqueue(&mut self, tasks: &mut TaskTable, id: TaskId) {
        let Some(task) = tasks.get_mut(&id) else {
            tracing::error!(task_id = %id, queue = %self.name, "enqueue of unknown task");
            return;
        };
        task.prev = self.tail;
        task.next = None;
        match self.tail {
            Some(tail) => {
                if let Some(prev) = tasks.get_mut(&tail) {
                    prev.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Unlink `id` from the queue. O(1).
    pub fn remove(&mut self, tasks: &mut TaskTable, id: TaskId) {
        let Some(task) = tasks.get_mut(&id) else {
            return;
        };
        let (prev, next) = (task.prev.take(), task.next.take());
        if prev.is_none() && next.is_none() && self.head != Some(id) {
            // Not linked here.
            return;
        }
        match prev {
            Some(p) => {
                if let Some(t) = tasks.get_mut(&p) {
                    t.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(t) = tasks.get_mut(&n) {
                    t.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Unlink and return the head.
    pub fn dequeue(&mut self, tasks: &mut TaskTable) -> Option<TaskId> {
        let head = self.head?;
        self.remove(tasks, head);
        Some(head)
    }

    /// Move `id` to the tail.
    pub fn move_to_back(&mut self, tasks: &mut TaskTable, id: TaskId) {
        if self.tail == Some(id) {
            return;
        }
        self.remove(tasks, id);
        self.enqueue(tasks, id);
    }

    /// First dispatchable task at or after `from`, plus the cursor to resume
    /// scanning after it.
    #[must_use]
    pub fn next_undispatched(
        &self,
        tasks: &TaskTable,
        from: Cursor,
        now: Instant,
    ) -> Option<(TaskId, Cursor)> {
        let mut current = match from {
            Cursor::Head => self.head,
            Cursor::At(id) => Some(id),
            Cursor::End => None,
        };
        while let Some(id) = current {
            let task = tasks.get(&id)?;
            if task.can_dispatch(now) {
                return Some((id, Cursor::from_link(task.next)));
            }
            current = task.next;
        }
        None
    }

    /// Up to `n` dispatchable tasks from the head, in order.
    #[must_use]
    pub fn undispatched(&self, tasks: &TaskTable, n: usize, now: Instant) -> Vec<TaskId> {
        let mut found = Vec::with_capacity(n.min(self.len));
        let mut cursor = Cursor::Head;
        while found.len() < n {
            let Some((id, next)) = self.next_undispatched(tasks, cursor, now) else {
                break;
            };
            found.push(id);
            cursor = next;
        }
        found
    }

    /// All linked ids, head to tail.
    #[must_use]
    pub fn ids(&self, tasks: &TaskTable) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut current = self.head;
        while let Some(id) = current {
            ids.push(id);
            current = tasks.get(&id).and_then(|t| t.next);
        }
        ids
    }
}

//! Run queue and delayed trigger queue
//!
//! The run queue orders tasks by `(priority, insertion)`: lower priority
//! numbers first, FIFO among equals. The trigger queue holds tasks until
//! their due time and orders by `(due, priority, insertion)`.

use chrono::{DateTime, Local};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::target::Task;

struct Queued {
    key: Reverse<(i32, u64)>,
    task: Task,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Priority run queue shared by the scheduler loop and the workers
#[derive(Default)]
pub struct RunQueue {
    heap: Mutex<BinaryHeap<Queued>>,
    ready: Condvar,
    seq: AtomicU64,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task and wake one waiting worker
    pub fn push(&self, task: Task) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        lock(&self.heap).push(Queued {
            key: Reverse((task.priority, seq)),
            task,
        });
        self.ready.notify_one();
    }

    /// Take the highest-priority task without waiting
    pub fn try_pop(&self) -> Option<Task> {
        lock(&self.heap).pop().map(|q| q.task)
    }

    /// Take the highest-priority task, waiting up to `timeout` for one
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Task> {
        let heap = lock(&self.heap);
        let (mut heap, _) = self
            .ready
            .wait_timeout_while(heap, timeout, |heap| heap.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        heap.pop().map(|q| q.task)
    }

    /// Wake every waiting worker
    pub fn wake_all(&self) {
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        lock(&self.heap).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Delayed {
    key: Reverse<(DateTime<Local>, i32, u64)>,
    task: Task,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Tasks waiting for a due time
#[derive(Default)]
pub struct TriggerQueue {
    heap: Mutex<BinaryHeap<Delayed>>,
    seq: AtomicU64,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, due: DateTime<Local>, task: Task) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        lock(&self.heap).push(Delayed {
            key: Reverse((due, task.priority, seq)),
            task,
        });
    }

    /// Remove and return every task due at or before `now`, earliest first
    pub fn drain_due(&self, now: DateTime<Local>) -> Vec<Task> {
        let mut heap = lock(&self.heap);
        let mut due = Vec::new();
        while heap.peek().is_some_and(|d| d.key.0 .0 <= now) {
            if let Some(delayed) = heap.pop() {
                due.push(delayed.task);
            }
        }
        due
    }

    /// Due time of the earliest pending task
    pub fn next_due(&self) -> Option<DateTime<Local>> {
        lock(&self.heap).peek().map(|d| d.key.0 .0)
    }

    pub fn len(&self) -> usize {
        lock(&self.heap).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

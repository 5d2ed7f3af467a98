//! Bounded priority queue shared between the dispatcher and workers
//!
//! Smaller priority values are served first; equal priorities are served in
//! insertion order. `try_get` never blocks. `put` waits at most the given
//! duration for space and hands the item back when the queue stays full.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Entry<T> {
    priority: u32,
    seq: u64,
    item: T,
}

impl<T> Entry<T> {
    fn rank(&self) -> Reverse<(u32, u64)> {
        Reverse((self.priority, self.seq))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
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
        self.rank().cmp(&other.rank())
    }
}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

/// Item rejected because the queue stayed full for the whole wait
#[derive(Debug)]
pub struct QueueFull<T>(pub T);

/// Fixed-capacity min-priority queue
pub struct PriorityQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    capacity: usize,
}

impl<T> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> PriorityQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert `item`, waiting up to `wait` for a free slot
    pub fn put(&self, priority: u32, item: T, wait: Duration) -> Result<(), QueueFull<T>> {
        let deadline = Instant::now() + wait;
        let mut inner = self.lock();

        while inner.heap.len() >= self.capacity {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QueueFull(item));
            }
            let (guard, _) = self
                .not_full
                .wait_timeout(inner, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner = guard;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Entry { priority, seq, item });
        Ok(())
    }

    /// Remove the most urgent item without blocking
    pub fn try_get(&self) -> Option<T> {
        let entry = self.lock().heap.pop();
        if entry.is_some() {
            self.not_full.notify_one();
        }
        entry.map(|e| e.item)
    }

    /// Remove every queued item for which `keep` returns false
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let removed = {
            let mut inner = self.lock();
            let before = inner.heap.len();
            inner.heap.retain(|entry| keep(&entry.item));
            before - inner.heap.len()
        };
        if removed > 0 {
            self.not_full.notify_all();
        }
        removed
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue is at capacity
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

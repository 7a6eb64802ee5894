//! Work Queue - FIFO of slice indices waiting for an executor

use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub current_size: usize,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    /// Abandoned slices put back for another executor
    pub requeued_total: u64,
}

/// Pending and abandoned slices in dispatch order. A slice index is queued at most once.
#[derive(Debug, Default)]
pub struct WorkQueue {
    queue: VecDeque<usize>,
    queued: HashSet<usize>,
    enqueued_count: u64,
    dequeued_count: u64,
    requeued_count: u64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue every index in `0..n`
    pub fn with_slices(n: usize) -> Self {
        let mut queue = Self::new();
        for index in 0..n {
            queue.enqueue(index);
        }
        queue
    }

    pub fn enqueue(&mut self, index: usize) -> bool {
        if !self.queued.insert(index) {
            return false;
        }
        self.queue.push_back(index);
        self.enqueued_count += 1;
        true
    }

    /// Put an abandoned slice back at the tail
    pub fn requeue(&mut self, index: usize) -> bool {
        let added = self.enqueue(index);
        if added {
            self.requeued_count += 1;
            debug!(slice = index, "slice re-queued");
        }
        added
    }

    /// Return a slice to the head after a failed hand-off
    pub fn restore(&mut self, index: usize) {
        if self.queued.insert(index) {
            self.queue.push_front(index);
        }
    }

    pub fn dequeue(&mut self) -> Option<usize> {
        let index = self.queue.pop_front()?;
        self.queued.remove(&index);
        self.dequeued_count += 1;
        Some(index)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything queued (cancellation); returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.queued.clear();
        dropped
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current_size: self.queue.len(),
            enqueued_total: self.enqueued_count,
            dequeued_total: self.dequeued_count,
            requeued_total: self.requeued_count,
        }
    }
}

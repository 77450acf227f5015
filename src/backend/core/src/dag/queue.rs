//! Four-level priority job queue with shutdown.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::task::TaskPriority;

/// A mutex-guarded deque per priority level. `pop` drains the
/// highest-priority non-empty level first; after `shutdown`, pushes are
/// dropped and `pop` only returns what is already queued.
pub struct PriorityQueue<T> {
    levels: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    queues: [VecDeque<T>; 4],
    stopped: bool,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self { levels: Mutex::new(QueueState { queues: Default::default(), stopped: false }) }
    }

    /// Returns false when the queue is shut down (the item is dropped).
    pub fn push(&self, item: T, priority: TaskPriority) -> bool {
        let mut state = self.levels.lock();
        if state.stopped {
            return false;
        }
        state.queues[priority.queue_index()].push_back(item);
        true
    }

    /// Pop the highest-priority item available.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.levels.lock();
        state.queues.iter_mut().find_map(|q| q.pop_front())
    }

    pub fn len(&self) -> usize {
        self.levels.lock().queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting items and drop everything queued.
    pub fn shutdown(&self) {
        let mut state = self.levels.lock();
        state.stopped = true;
        state.queues.iter_mut().for_each(VecDeque::clear);
    }

    pub fn is_shutdown(&self) -> bool {
        self.levels.lock().stopped
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_highest_priority_first() {
        let q = PriorityQueue::new();
        q.push("low", TaskPriority::Low);
        q.push("critical", TaskPriority::Critical);
        q.push("normal", TaskPriority::Normal);
        q.push("high", TaskPriority::High);

        assert_eq!(q.pop(), Some("critical"));
        assert_eq!(q.pop(), Some("high"));
        assert_eq!(q.pop(), Some("normal"));
        assert_eq!(q.pop(), Some("low"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn fifo_within_one_level() {
        let q = PriorityQueue::new();
        q.push(1, TaskPriority::Normal);
        q.push(2, TaskPriority::Normal);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn shutdown_drops_queued_and_rejects_new() {
        let q = PriorityQueue::new();
        q.push(1, TaskPriority::Normal);
        q.shutdown();
        assert!(q.is_shutdown());
        assert_eq!(q.pop(), None);
        assert!(!q.push(2, TaskPriority::Normal));
        assert!(q.is_empty());
    }
}

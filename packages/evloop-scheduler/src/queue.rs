use std::collections::VecDeque;

use crate::task::Stamped;

/// A FIFO queue of tasks.
///
/// Insertion order is the only ordering key. The queue is unbounded; a task
/// that keeps re-enqueueing itself grows it forever, which is the caller's bug.
/// Since the loop is single-threaded the owner wraps it in a `RefCell`.
pub(crate) struct TaskQueue<T> {
    queue: VecDeque<T>,
    next_stamp: u64,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            next_stamp: 0,
        }
    }

    pub fn dequeue_one(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    pub fn front(&self) -> Option<&T> {
        self.queue.front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drops every queued task without running it. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }
}

impl<T: Stamped> TaskQueue<T> {
    pub fn enqueue(&mut self, mut task: T) {
        task.stamp(self.next_stamp);
        self.next_stamp += 1;
        self.queue.push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        name: &'static str,
        stamp: u64,
    }

    impl Stamped for Item {
        fn stamp(&mut self, stamp: u64) {
            self.stamp = stamp;
        }
    }

    fn item(name: &'static str) -> Item {
        Item { name, stamp: u64::MAX }
    }

    #[test]
    fn test_fifo_with_monotonic_stamps() {
        let mut queue = TaskQueue::new();
        queue.enqueue(item("a"));
        queue.enqueue(item("b"));

        assert_eq!(queue.front().map(|i| i.name), Some("a"));
        let first = queue.dequeue_one().unwrap();
        queue.enqueue(item("c"));

        assert_eq!((first.name, first.stamp), ("a", 0));
        let rest: Vec<_> = std::iter::from_fn(|| queue.dequeue_one())
            .map(|i| (i.name, i.stamp))
            .collect();
        assert_eq!(rest, vec![("b", 1), ("c", 2)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut queue = TaskQueue::new();
        queue.enqueue(item("a"));
        queue.enqueue(item("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.clear(), 2);
        assert!(queue.dequeue_one().is_none());
    }
}

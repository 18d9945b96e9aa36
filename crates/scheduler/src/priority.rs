//! Prefetch priorities and the delayed request queue
//!
//! Immediate and near requests are issued as soon as focus changes. Far
//! requests wait in a [`DelayedQueue`] until their debounce deadline passes.

use crate::cancel::Generation;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Prefetch priority levels
///
/// Higher variants are issued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrefetchPriority {
    /// Two ahead of focus, issued after the debounce delay
    Far = 0,

    /// The item just behind focus
    Near = 1,

    /// The item just ahead of focus
    Immediate = 2,
}

impl PrefetchPriority {
    /// Whether requests at this priority wait for the debounce delay
    pub fn is_delayed(self) -> bool {
        matches!(self, PrefetchPriority::Far)
    }
}

/// A speculative load request for one feed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchRequest {
    /// Stable content identity of the target item (its feed id)
    pub key: String,

    /// Position of the item in the feed when the request was planned
    pub index: usize,

    pub priority: PrefetchPriority,

    /// Focus generation the request was planned for
    pub generation: Generation,
}

/// A request waiting for its deadline
///
/// Entries are ordered by deadline (earliest first), then by insertion order
/// so requests sharing a deadline come out FIFO.
#[derive(Debug, Clone)]
struct DelayedEntry {
    request: PrefetchRequest,
    due: Instant,
    insertion_order: u64,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.insertion_order == other.insertion_order
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap, so both comparisons are reversed.
        match other.due.cmp(&self.due) {
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            ordering => ordering,
        }
    }
}

/// Deadline-ordered queue of delayed prefetch requests
#[derive(Debug, Default)]
pub struct DelayedQueue {
    heap: BinaryHeap<DelayedEntry>,
    insertion_counter: u64,
}

impl DelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `request` to become due at `due`
    pub fn push(&mut self, request: PrefetchRequest, due: Instant) {
        let insertion_order = self.insertion_counter;
        self.insertion_counter += 1;
        self.heap.push(DelayedEntry {
            request,
            due,
            insertion_order,
        });
    }

    /// Pop the earliest request whose deadline is at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<PrefetchRequest> {
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|entry| entry.request)
    }

    /// Deadline of the earliest queued request
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.due)
    }

    /// Remove all requests matching a predicate
    ///
    /// Returns the number of requests removed.
    pub fn remove_if<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&PrefetchRequest) -> bool,
    {
        let original_len = self.heap.len();
        self.heap.retain(|entry| !predicate(&entry.request));
        original_len - self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Queued requests in arbitrary order (for inspection)
    pub fn requests(&self) -> impl Iterator<Item = &PrefetchRequest> {
        self.heap.iter().map(|entry| &entry.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(index: usize, generation: Generation) -> PrefetchRequest {
        PrefetchRequest {
            key: format!("post-{index}"),
            index,
            priority: PrefetchPriority::Far,
            generation,
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(PrefetchPriority::Immediate > PrefetchPriority::Near);
        assert!(PrefetchPriority::Near > PrefetchPriority::Far);
        assert!(PrefetchPriority::Far.is_delayed());
        assert!(!PrefetchPriority::Immediate.is_delayed());
    }

    #[test]
    fn test_nothing_due_before_deadline() {
        let start = Instant::now();
        let mut queue = DelayedQueue::new();
        queue.push(request(2, 1), start + Duration::from_millis(1000));

        assert!(queue.pop_due(start).is_none());
        assert!(queue.pop_due(start + Duration::from_millis(999)).is_none());
        assert_eq!(queue.pop_due(start + Duration::from_millis(1000)).unwrap().index, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_earliest_deadline_first() {
        let start = Instant::now();
        let mut queue = DelayedQueue::new();
        queue.push(request(9, 2), start + Duration::from_millis(500));
        queue.push(request(3, 1), start + Duration::from_millis(100));

        let later = start + Duration::from_secs(1);
        assert_eq!(queue.pop_due(later).unwrap().index, 3);
        assert_eq!(queue.pop_due(later).unwrap().index, 9);
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_fifo_for_equal_deadlines() {
        let due = Instant::now();
        let mut queue = DelayedQueue::new();
        queue.push(request(1, 1), due);
        queue.push(request(2, 1), due);
        queue.push(request(3, 1), due);

        assert_eq!(queue.pop_due(due).unwrap().index, 1);
        assert_eq!(queue.pop_due(due).unwrap().index, 2);
        assert_eq!(queue.pop_due(due).unwrap().index, 3);
    }

    #[test]
    fn test_remove_if() {
        let due = Instant::now();
        let mut queue = DelayedQueue::new();
        queue.push(request(1, 1), due);
        queue.push(request(2, 2), due);
        queue.push(request(3, 2), due);

        assert_eq!(queue.remove_if(|r| r.generation < 2), 1);
        assert_eq!(queue.len(), 2);
        assert!(queue.requests().all(|r| r.generation == 2));
    }
}

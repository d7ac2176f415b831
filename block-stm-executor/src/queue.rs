//! Thread-safe min-priority queue.

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Min-heap behind a mutex; `pop` always returns the smallest item.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: Mutex<BinaryHeap<Reverse<T>>>,
}

impl<T: Ord> PriorityQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
        }
    }

    pub fn push(&self, item: T) {
        self.heap.lock().push(Reverse(item));
    }

    pub fn pop(&self) -> Option<T> {
        self.heap.lock().pop().map(|Reverse(item)| item)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

impl<T: Ord> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

//! Bounded MPMC queue used between event producers and the broadcaster/bridge
//! (C16, §4.11). Overflow policy is drop-oldest with a counter, per §9 ("do
//! not rely on memory-allocator back-pressure").

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct LockFreeQueue<T> {
    inner: ArrayQueue<T>,
    dropped: AtomicU64,
}

impl<T> LockFreeQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self { inner: ArrayQueue::new(capacity.max(1)), dropped: AtomicU64::new(0) }
    }

    /// Push a value, dropping the oldest queued value (not this one) if the
    /// queue is full.
    pub fn push(&self, value: T) {
        if let Err(value) = self.inner.push(value) {
            let _ = self.inner.pop();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            // The slot freed by the pop may have been raced by another
            // producer; retry once and count a second drop if still full.
            if self.inner.push(value).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_roundtrip() {
        let q: LockFreeQueue<i32> = LockFreeQueue::new(4);
        q.push(1);
        q.push(2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let q: LockFreeQueue<i32> = LockFreeQueue::new(2);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.dropped_count(), 1);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }
}

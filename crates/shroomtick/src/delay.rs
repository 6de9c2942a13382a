use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use crate::clock::Ticks;

struct Entry<T> {
    due: Ticks,
    seq: u64,
    value: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
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
        // Due tick first; insertion order breaks ties.
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    seq: u64,
}

/// A synchronised priority queue keyed by absolute tick.
pub struct DelayQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                seq: 0,
            }),
        }
    }

    pub fn enqueue(&self, due: Ticks, value: T) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let seq = inner.seq;
        inner.seq += 1;
        inner.heap.push(Reverse(Entry { due, seq, value }));
    }

    /// Remove and return every entry due at or before `now`, ordered by
    /// due tick (FIFO among equals).
    pub fn drain_due(&self, now: Ticks) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        while let Some(Reverse(head)) = inner.heap.peek() {
            if head.due > now {
                break;
            }
            let Reverse(entry) = inner.heap.pop().expect("peeked entry");
            out.push(entry.value);
        }
        out
    }

    /// The earliest due tick still queued.
    pub fn next_due(&self) -> Option<Ticks> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.peek().map(|Reverse(e)| e.due)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_due_order() {
        let q = DelayQueue::new();
        q.enqueue(Ticks::from_millis(30), "c");
        q.enqueue(Ticks::from_millis(10), "a");
        q.enqueue(Ticks::from_millis(20), "b");

        assert_eq!(q.next_due(), Some(Ticks::from_millis(10)));
        assert_eq!(q.drain_due(Ticks::from_millis(25)), vec!["a", "b"]);
        assert_eq!(q.drain_due(Ticks::from_millis(25)), Vec::<&str>::new());
        assert_eq!(q.drain_due(Ticks::from_millis(30)), vec!["c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn equal_due_ticks_keep_insertion_order() {
        let q = DelayQueue::new();
        for i in 0..5 {
            q.enqueue(Ticks::from_millis(10), i);
        }
        assert_eq!(q.drain_due(Ticks::from_millis(10)), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn future_entries_stay_queued() {
        let q = DelayQueue::new();
        q.enqueue(Ticks::from_millis(100), ());
        assert!(q.drain_due(Ticks::from_millis(99)).is_empty());
        assert_eq!(q.len(), 1);
    }
}

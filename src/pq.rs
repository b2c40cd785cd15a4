//! Timer priority queue
//!
//! Min-heap of timers ordered by (deadline, seq, id), with a side map that is
//! the source of truth. Removal is lazy: cancelled entries stay in the heap
//! until they surface and are discarded.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

/// Heap key. Floats are ordered with `total_cmp` so ordering is total and
/// reproducible.
#[derive(Clone, Copy, Debug)]
struct Key {
    deadline: f64,
    seq: u64,
    id: u64,
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .total_cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
            .then(self.id.cmp(&other.id))
    }
}

/// Entry returned by [`MinPq::pop`].
#[derive(Debug)]
pub struct Entry<M> {
    pub id: u64,
    pub deadline: f64,
    pub seq: u64,
    pub meta: M,
}

/// Min-priority queue of timers with O(1) cancellation.
pub struct MinPq<M> {
    heap: BinaryHeap<Reverse<Key>>,
    live: HashMap<u64, Entry<M>>,
}

impl<M> Default for MinPq<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MinPq<M> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
        }
    }

    /// Insert a timer. Returns false if `id` is already queued.
    pub fn add(&mut self, id: u64, deadline: f64, seq: u64, meta: M) -> bool {
        if self.live.contains_key(&id) {
            return false;
        }
        self.heap.push(Reverse(Key { deadline, seq, id }));
        self.live.insert(
            id,
            Entry {
                id,
                deadline,
                seq,
                meta,
            },
        );
        true
    }

    /// Cancel a timer, returning its metadata if it was still queued.
    pub fn remove(&mut self, id: u64) -> Option<M> {
        self.live.remove(&id).map(|e| e.meta)
    }

    /// Earliest live deadline.
    pub fn peek_deadline(&mut self) -> Option<f64> {
        self.discard_stale();
        self.heap.peek().map(|Reverse(k)| k.deadline)
    }

    /// Remove and return the earliest live timer.
    pub fn pop(&mut self) -> Option<Entry<M>> {
        self.discard_stale();
        let Reverse(key) = self.heap.pop()?;
        self.live.remove(&key.id)
    }

    fn is_live(&self, key: &Key) -> bool {
        self.live
            .get(&key.id)
            .is_some_and(|e| e.seq == key.seq && e.deadline.to_bits() == key.deadline.to_bits())
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_deadline_order() {
        let mut pq: MinPq<&str> = MinPq::new();
        assert!(pq.add(1, 0.5, 0, "first"));
        assert!(pq.add(2, 0.2, 1, "second"));
        assert!(pq.add(3, 0.8, 2, "third"));

        let e = pq.pop().unwrap();
        assert_eq!((e.id, e.meta), (2, "second"));
        let e = pq.pop().unwrap();
        assert_eq!((e.id, e.meta), (1, "first"));
        let e = pq.pop().unwrap();
        assert_eq!((e.id, e.meta), (3, "third"));
        assert!(pq.pop().is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut pq: MinPq<()> = MinPq::new();
        assert!(pq.add(7, 1.0, 0, ()));
        assert!(!pq.add(7, 2.0, 1, ()));
        assert_eq!(pq.len(), 1);
    }

    #[test]
    fn test_remove_is_lazy_but_invisible() {
        let mut pq: MinPq<i32> = MinPq::new();
        pq.add(1, 0.5, 0, 100);
        pq.add(2, 0.2, 1, 200);

        assert_eq!(pq.remove(2), Some(200));
        assert_eq!(pq.remove(2), None);
        assert_eq!(pq.peek_deadline(), Some(0.5));
        assert_eq!(pq.pop().unwrap().id, 1);
        assert!(pq.is_empty());
    }

    #[test]
    fn test_same_deadline_breaks_ties_by_seq() {
        let mut pq: MinPq<u32> = MinPq::new();
        pq.add(1, 0.5, 2, 100);
        pq.add(2, 0.5, 0, 200);
        pq.add(3, 0.5, 1, 300);

        let ids: Vec<u64> = std::iter::from_fn(|| pq.pop().map(|e| e.id)).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_reused_id_after_remove() {
        let mut pq: MinPq<&str> = MinPq::new();
        pq.add(1, 0.1, 0, "old");
        pq.remove(1);
        pq.add(1, 0.9, 1, "new");

        // The stale heap key for the old entry must not resurrect it.
        assert_eq!(pq.peek_deadline(), Some(0.9));
        assert_eq!(pq.pop().unwrap().meta, "new");
    }
}

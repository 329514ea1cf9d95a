//! Time-ordered holding area for deferred keys.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

/// Wrapper for min-heap ordering on (deadline, seq).
#[derive(Debug)]
struct DelayEntry<K> {
    deadline: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for DelayEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<K> Eq for DelayEntry<K> {}

impl<K> PartialOrd for DelayEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for DelayEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest deadline on top; equal deadlines release in insertion order.
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Holds keys until their release time.
///
/// The scheduler does not deduplicate: rescheduling a key pushes a new entry
/// and the caller discards superseded ones by comparing the returned `seq`
/// against the one it recorded last.
#[derive(Debug)]
pub struct DelayScheduler<K> {
    heap: BinaryHeap<DelayEntry<K>>,
    next_seq: u64,
}

impl<K> Default for DelayScheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> DelayScheduler<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `key` for release at `deadline`; returns the entry's sequence number.
    pub fn schedule(&mut self, key: K, deadline: Instant) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(DelayEntry { deadline, seq, key });
        seq
    }

    /// Pop the earliest entry whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(K, u64)> {
        if self.heap.peek()?.deadline > now {
            return None;
        }
        self.heap.pop().map(|e| (e.key, e.seq))
    }

    /// Number of entries, superseded ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Drop every entry for which `keep(key, seq)` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, u64) -> bool) {
        self.heap.retain(|e| keep(&e.key, e.seq));
    }
}

//! Pull queue
//!
//! Collects the addresses a picker wants loaded. Lower priority values are
//! served first; equal priorities keep their enqueue order.

use super::address::ZoomedAddress;
use rustc_hash::FxHashSet;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PullRequest {
    priority: i32,
    sequence: u64,
    address: ZoomedAddress,
}

impl Ord for PullRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.sequence).cmp(&(other.priority, other.sequence))
    }
}

impl PartialOrd for PullRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct PullQueue {
    heap: BinaryHeap<Reverse<PullRequest>>,
    queued: FxHashSet<ZoomedAddress>,
    next_sequence: u64,
}

impl PullQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the address was already queued
    pub fn enqueue(&mut self, address: ZoomedAddress, priority: i32) -> bool {
        if !self.queued.insert(address) {
            return false;
        }
        self.heap.push(Reverse(PullRequest {
            priority,
            sequence: self.next_sequence,
            address,
        }));
        self.next_sequence += 1;
        true
    }

    /// Hand out at most `count` addresses, most urgent first
    pub fn take(&mut self, count: usize) -> Vec<ZoomedAddress> {
        let mut taken = Vec::with_capacity(count.min(self.heap.len()));
        while taken.len() < count {
            let Some(Reverse(request)) = self.heap.pop() else {
                break;
            };
            self.queued.remove(&request.address);
            taken.push(request.address);
        }
        taken
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.queued.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(x: i32) -> ZoomedAddress {
        ZoomedAddress::new(x, 0, 0, 0)
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = PullQueue::new();
        queue.enqueue(addr(1), 5);
        queue.enqueue(addr(2), 0);
        queue.enqueue(addr(3), 0);
        queue.enqueue(addr(4), -1);

        assert_eq!(queue.take(3), vec![addr(4), addr(2), addr(3)]);
        assert_eq!(queue.take(10), vec![addr(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let mut queue = PullQueue::new();
        assert!(queue.enqueue(addr(1), 0));
        assert!(!queue.enqueue(addr(1), -5));
        assert_eq!(queue.len(), 1);

        queue.take(1);
        assert!(queue.enqueue(addr(1), 0));
    }
}

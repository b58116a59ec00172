//! # Ready Queue
//!
//! Priority heap of tasks whose dependencies are satisfied. Higher priority pops first;
//! equal priorities pop in creation order.
//!
//! Entries are never removed in place: a task that leaves `Queued` (cancelled, failed
//! upstream) stays in the heap and callers discard it on pop.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEntry {
    pub priority: i32,
    pub sequence: u64,
    pub step_id: String,
}

impl ReadyEntry {
    /// Dispatch ordering key; greater dispatches first
    pub fn rank(&self) -> (i32, std::cmp::Reverse<u64>) {
        (self.priority, std::cmp::Reverse(self.sequence))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| other.step_id.cmp(&self.step_id))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<ReadyEntry>,
    /// Retries waiting out their backoff, promoted by the dispatcher
    delayed: Vec<(Instant, ReadyEntry)>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ReadyEntry) {
        self.heap.push(entry);
    }

    /// Hold `entry` back until `ready_at`
    pub fn push_delayed(&mut self, entry: ReadyEntry, ready_at: Instant) {
        self.delayed.push((ready_at, entry));
    }

    /// Move delayed entries whose time has come into the heap
    pub fn promote_due(&mut self, now: Instant) -> usize {
        if self.delayed.is_empty() {
            return 0;
        }
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(ready_at, _)| *ready_at <= now);
        self.delayed = waiting;
        let promoted = due.len();
        self.heap.extend(due.into_iter().map(|(_, entry)| entry));
        promoted
    }

    pub fn peek(&self) -> Option<&ReadyEntry> {
        self.heap.peek()
    }

    pub fn pop(&mut self) -> Option<ReadyEntry> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len() + self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty() && self.delayed.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.delayed.clear();
    }

    /// Step ids in the heap, in no particular order
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.heap
            .iter()
            .chain(self.delayed.iter().map(|(_, entry)| entry))
            .map(|entry| entry.step_id.as_str())
    }
}

//! Deadline heap for sleeping and timed waits

use crate::handle::Handle;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Entry in the timer heap
#[derive(Debug)]
pub(crate) struct TimerEntry {
    /// When to wake the task
    pub(crate) deadline: Instant,
    /// Task to wake
    pub(crate) handle: Handle,
    /// Wait epoch of the task when the timer was armed. A task that woke
    /// early and went back to sleep has a newer epoch, which marks this
    /// entry stale.
    pub(crate) epoch: u64,
}

// Reverse ordering for a min-heap (earliest deadline first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.epoch.cmp(&self.epoch))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
            && self.epoch == other.epoch
            && self.handle == other.handle
    }
}

impl Eq for TimerEntry {}

/// Pending deadlines, earliest first
#[derive(Debug, Default)]
pub(crate) struct Timers {
    heap: BinaryHeap<TimerEntry>,
}

impl Timers {
    pub(crate) fn arm(&mut self, deadline: Instant, handle: Handle, epoch: u64) {
        self.heap.push(TimerEntry {
            deadline,
            handle,
            epoch,
        });
    }

    /// Earliest entry
    pub(crate) fn peek(&self) -> Option<&TimerEntry> {
        self.heap.peek()
    }

    /// Remove the earliest entry
    pub(crate) fn pop(&mut self) -> Option<TimerEntry> {
        self.heap.pop()
    }

    /// Pop one entry whose deadline is at or before `now`
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<TimerEntry> {
        if self.heap.peek()?.deadline <= now {
            self.heap.pop()
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}

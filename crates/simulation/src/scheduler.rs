//! Virtual clock and deterministically ordered event queue.

use blockprop_types::TimeMs;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Key ordering tasks in the queue.
///
/// Tasks execute in non-decreasing virtual time; ties are broken by
/// insertion sequence, so two tasks scheduled for the same instant run in
/// FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKey {
    /// Scheduled execution time.
    pub time: TimeMs,
    /// Insertion sequence, unique per scheduled task.
    pub sequence: u64,
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => self.sequence.cmp(&other.sequence),
            ord => ord,
        }
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handle to a scheduled task, used for tombstone cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

/// The virtual clock plus a min-priority queue of pending tasks.
///
/// Cancellation is by tombstone: a cancelled handle's task stays in the
/// queue and is silently skipped when it reaches the front. There is no
/// preemption and no priority dimension beyond time and insertion order.
#[derive(Debug)]
pub struct Scheduler<T> {
    now: TimeMs,
    queue: BTreeMap<EventKey, T>,
    cancelled: HashSet<u64>,
    sequence: u64,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now: 0,
            queue: BTreeMap::new(),
            cancelled: HashSet::new(),
            sequence: 0,
        }
    }

    /// Current virtual time in ms. Never decreases.
    pub fn now(&self) -> TimeMs {
        self.now
    }

    /// Number of pending (possibly tombstoned) tasks.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Insert a task to execute `delay_ms` from now.
    pub fn schedule(&mut self, task: T, delay_ms: TimeMs) -> TaskHandle {
        self.sequence += 1;
        let key = EventKey {
            time: self.now + delay_ms,
            sequence: self.sequence,
        };
        self.queue.insert(key, task);
        TaskHandle(self.sequence)
    }

    /// Tombstone a scheduled task. A handle that already ran (or was
    /// already cancelled) is ignored.
    pub fn cancel(&mut self, handle: TaskHandle) {
        self.cancelled.insert(handle.0);
    }

    /// Pop the next live task, advancing the clock to its execution time.
    ///
    /// Tombstoned entries are dropped without advancing the clock; they
    /// cannot reorder anything since the queue is time-ordered.
    pub fn run_next(&mut self) -> Option<(TimeMs, T)> {
        while let Some((key, task)) = self.queue.pop_first() {
            if self.cancelled.remove(&key.sequence) {
                continue;
            }
            self.now = key.time;
            return Some((key.time, task));
        }
        None
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_in_time_order() {
        let mut s = Scheduler::new();
        s.schedule("late", 50);
        s.schedule("early", 10);
        s.schedule("middle", 30);

        assert_eq!(s.run_next(), Some((10, "early")));
        assert_eq!(s.run_next(), Some((30, "middle")));
        assert_eq!(s.run_next(), Some((50, "late")));
        assert_eq!(s.run_next(), None);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut s = Scheduler::new();
        s.schedule("first", 20);
        s.schedule("second", 20);
        s.schedule("third", 20);

        assert_eq!(s.run_next(), Some((20, "first")));
        assert_eq!(s.run_next(), Some((20, "second")));
        assert_eq!(s.run_next(), Some((20, "third")));
    }

    #[test]
    fn clock_advances_monotonically() {
        let mut s = Scheduler::new();
        s.schedule("a", 5);
        assert_eq!(s.now(), 0);
        s.run_next();
        assert_eq!(s.now(), 5);
        // Delays are relative to the advanced clock.
        s.schedule("b", 7);
        s.run_next();
        assert_eq!(s.now(), 12);
    }

    #[test]
    fn cancelled_tasks_are_skipped() {
        let mut s = Scheduler::new();
        let doomed = s.schedule("doomed", 10);
        s.schedule("survivor", 20);
        s.cancel(doomed);

        assert_eq!(s.run_next(), Some((20, "survivor")));
        // Skipping a tombstone must not advance the clock past the
        // survivor's execution time.
        assert_eq!(s.now(), 20);
        assert!(s.is_empty());
    }

    #[test]
    fn cancelling_a_completed_handle_is_harmless() {
        let mut s = Scheduler::new();
        let handle = s.schedule("task", 1);
        assert_eq!(s.run_next(), Some((1, "task")));
        s.cancel(handle);
        s.schedule("next", 1);
        assert_eq!(s.run_next(), Some((2, "next")));
    }
}

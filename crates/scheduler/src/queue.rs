//! Thread-safe priority queue feeding the consumer thread.
//!
//! ## Ordering
//!
//! - The stop signal sorts before every task.
//! - Tasks sort by ascending due time.
//! - Equal due times keep insertion order (each push takes a fresh sequence
//!   number, so a retried task queues behind work pushed before its retry).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use wikitask_core::{TaskType, Version};

use crate::record::{TaskKey, TaskRecord};

/// Item handed to the consumer thread.
#[derive(Debug)]
pub enum QueueEntry {
    Work(TaskRecord),
    /// Halts the consume loop.
    Stop,
}

/// A blocked `take` was woken by [`TaskQueue::interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted while waiting for a task")]
pub struct Interrupted;

// Variant order matters: `Stop` < `Due(_)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    Stop,
    Due(DateTime<Utc>),
}

type Position = (Priority, u64);

#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<Position, QueueEntry>,
    next_seq: u64,
    work: usize,
    by_type: HashMap<TaskType, usize>,
    interrupted: bool,
}

impl QueueState {
    fn insert(&mut self, priority: Priority, entry: QueueEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let QueueEntry::Work(record) = &entry {
            self.work += 1;
            *self.by_type.entry(record.task_type().clone()).or_default() += 1;
        }
        self.entries.insert((priority, seq), entry);
    }

    fn pop_first(&mut self) -> Option<QueueEntry> {
        let (_, entry) = self.entries.pop_first()?;
        if let QueueEntry::Work(record) = &entry {
            self.forget(record.task_type());
        }
        Some(entry)
    }

    fn remove_key(&mut self, key: &TaskKey) -> Vec<TaskRecord> {
        let positions: Vec<Position> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, QueueEntry::Work(r) if r.key() == key))
            .map(|(p, _)| *p)
            .collect();

        let mut removed = Vec::with_capacity(positions.len());
        for pos in positions {
            if let Some(QueueEntry::Work(record)) = self.entries.remove(&pos) {
                self.forget(record.task_type());
                removed.push(record);
            }
        }
        removed
    }

    fn forget(&mut self, task_type: &TaskType) {
        self.work = self.work.saturating_sub(1);
        if let Some(n) = self.by_type.get_mut(task_type) {
            *n -= 1;
            if *n == 0 {
                self.by_type.remove(task_type);
            }
        }
    }
}

/// In-memory priority queue with a blocking `take`.
///
/// Producers never block beyond the short critical section; the single
/// consumer blocks in [`TaskQueue::take`] while the queue is empty.
#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueue a task; returns the number of queued tasks afterwards.
    pub fn push(&self, record: TaskRecord) -> usize {
        let mut state = self.state();
        let due = Priority::Due(record.due_time());
        state.insert(due, QueueEntry::Work(record));
        let depth = state.work;
        drop(state);
        self.available.notify_one();
        depth
    }

    /// Enqueue the stop signal ahead of everything else.
    pub fn push_stop(&self) {
        let mut state = self.state();
        state.insert(Priority::Stop, QueueEntry::Stop);
        drop(state);
        self.available.notify_one();
    }

    /// Atomically drop every queued task with the same key and enqueue `record`.
    ///
    /// Returns the superseded records so the caller can cancel their handles.
    /// Records already taken by the consumer are not affected.
    pub fn replace(&self, record: TaskRecord) -> Vec<TaskRecord> {
        let mut state = self.state();
        let removed = state.remove_key(record.key());
        let due = Priority::Due(record.due_time());
        state.insert(due, QueueEntry::Work(record));
        drop(state);
        self.available.notify_one();
        removed
    }

    /// Block until an entry is available and take the earliest one.
    pub fn take(&self) -> Result<QueueEntry, Interrupted> {
        let mut state = self.state();
        loop {
            if state.interrupted {
                state.interrupted = false;
                return Err(Interrupted);
            }
            if let Some(entry) = state.pop_first() {
                return Ok(entry);
            }
            state = match self.available.wait(state) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Take the earliest entry if there is one.
    pub fn try_take(&self) -> Option<QueueEntry> {
        self.state().pop_first()
    }

    /// Wake a blocked [`TaskQueue::take`] (or make the next one return early).
    pub fn interrupt(&self) {
        self.state().interrupted = true;
        self.available.notify_all();
    }

    /// Number of queued tasks (the stop signal is not counted).
    pub fn len(&self) -> usize {
        self.state().work
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued tasks of one type.
    pub fn len_of(&self, task_type: &TaskType) -> usize {
        self.state().by_type.get(task_type).copied().unwrap_or(0)
    }

    /// Whether a task with this key and version is waiting in the queue.
    pub fn contains_version(&self, key: &TaskKey, version: &Version) -> bool {
        self.state().entries.values().any(|e| {
            matches!(e, QueueEntry::Work(r) if r.key() == key && r.version() == version)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::TimeZone;
    use proptest::prelude::*;
    use wikitask_core::{DocumentId, TenantId};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(doc: i64, task_type: &str, offset_secs: i64) -> TaskRecord {
        let key = TaskKey::new(TenantId::new("wikiA"), TaskType::new(task_type), DocumentId::new(doc));
        let (record, _handle) =
            TaskRecord::new(key, Version::new("1.0"), base() + chrono::Duration::seconds(offset_secs));
        record
    }

    fn take_doc(queue: &TaskQueue) -> Option<i64> {
        match queue.try_take()? {
            QueueEntry::Work(r) => Some(r.document_id().get()),
            QueueEntry::Stop => Some(-1),
        }
    }

    #[test]
    fn takes_earliest_due_first() {
        let queue = TaskQueue::new();
        queue.push(record(3, "links", 30));
        queue.push(record(1, "links", 10));
        queue.push(record(2, "links", 20));

        assert_eq!(take_doc(&queue), Some(1));
        assert_eq!(take_doc(&queue), Some(2));
        assert_eq!(take_doc(&queue), Some(3));
        assert_eq!(take_doc(&queue), None);
    }

    #[test]
    fn equal_due_times_keep_insertion_order() {
        let queue = TaskQueue::new();
        for doc in [5, 3, 9, 1] {
            queue.push(record(doc, "links", 0));
        }
        let order: Vec<_> = std::iter::from_fn(|| take_doc(&queue)).collect();
        assert_eq!(order, vec![5, 3, 9, 1]);
    }

    #[test]
    fn stop_preempts_pending_work() {
        let queue = TaskQueue::new();
        queue.push(record(1, "links", -100));
        queue.push_stop();
        assert_eq!(take_doc(&queue), Some(-1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn replace_removes_only_matching_key() {
        let queue = TaskQueue::new();
        queue.push(record(1, "links", 0));
        queue.push(record(1, "links", 1));
        queue.push(record(1, "index", 2));
        queue.push(record(2, "links", 3));

        let removed = queue.replace(record(1, "links", 4));
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.len_of(&TaskType::new("links")), 2);
        assert_eq!(queue.len_of(&TaskType::new("index")), 1);
    }

    #[test]
    fn counts_track_takes() {
        let queue = TaskQueue::new();
        queue.push(record(1, "links", 0));
        queue.push(record(2, "index", 1));
        assert_eq!(queue.len(), 2);

        take_doc(&queue);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.len_of(&TaskType::new("links")), 0);
        assert_eq!(queue.len_of(&TaskType::new("index")), 1);
        assert!(!queue.is_empty());
    }

    #[test]
    fn contains_version_matches_key_and_version() {
        let queue = TaskQueue::new();
        let r = record(7, "links", 0);
        let key = r.key().clone();
        queue.push(r);
        assert!(queue.contains_version(&key, &Version::new("1.0")));
        assert!(!queue.contains_version(&key, &Version::new("2.0")));
    }

    #[test]
    fn take_blocks_until_push() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.take())
        };

        thread::sleep(Duration::from_millis(50));
        queue.push(record(11, "links", 0));

        match consumer.join().unwrap() {
            Ok(QueueEntry::Work(r)) => assert_eq!(r.document_id().get(), 11),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn interrupt_wakes_blocked_take() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.take())
        };

        thread::sleep(Duration::from_millis(50));
        queue.interrupt();

        assert!(matches!(consumer.join().unwrap(), Err(Interrupted)));

        // The flag is consumed by the interrupted take.
        queue.push(record(1, "links", 0));
        assert!(matches!(queue.take(), Ok(QueueEntry::Work(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: whatever the push order, takes come out in non-decreasing
        /// due time, and ties come out in push order.
        #[test]
        fn takes_are_ordered_by_due_time_then_insertion(
            offsets in prop::collection::vec(0i64..20, 1..40)
        ) {
            let queue = TaskQueue::new();
            for (i, offset) in offsets.iter().enumerate() {
                queue.push(record(i as i64, "links", *offset));
            }

            let mut taken = Vec::new();
            while let Some(QueueEntry::Work(r)) = queue.try_take() {
                taken.push((r.due_time(), r.document_id().get()));
            }

            prop_assert_eq!(taken.len(), offsets.len());
            for pair in taken.windows(2) {
                prop_assert!(pair[0].0 <= pair[1].0);
                if pair[0].0 == pair[1].0 {
                    prop_assert!(pair[0].1 < pair[1].1);
                }
            }
        }
    }
}

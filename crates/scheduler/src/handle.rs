//! Completion handles observed by producers.
//!
//! A handle is a one-shot slot: the consumer thread resolves it exactly once,
//! either with the finished task or with a cancellation (superseded or
//! abandoned). Later resolutions are ignored. A record released without
//! either (a scheduler dropped with work still queued) resolves as `Dropped`,
//! so `wait` never outlives the scheduler.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::record::TaskSnapshot;

/// Final state of a queued task as seen by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The consumer succeeded.
    Completed(TaskSnapshot),
    /// Superseded by `replace_task` or abandoned after the retry cap.
    Cancelled,
    /// Released unrun when the scheduler went away. The persisted row is
    /// picked up by the next run of the same instance.
    Dropped,
}

#[derive(Debug, Default)]
struct Slot {
    outcome: Mutex<Option<TaskOutcome>>,
    ready: Condvar,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Option<TaskOutcome>> {
        // The slot holds plain data, so a poisoned lock is still consistent.
        match self.outcome.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Producer-side view of a task's completion.
///
/// Cheap to clone; every clone observes the same outcome.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    slot: Arc<Slot>,
}

impl CompletionHandle {
    /// Current outcome, without blocking.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.slot.lock().clone()
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.slot.lock(), Some(TaskOutcome::Cancelled))
    }

    /// Block until the task is resolved (completed, cancelled or dropped).
    pub fn wait(&self) -> TaskOutcome {
        let mut guard = self.slot.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            guard = match self.slot.ready.wait(guard) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block for at most `timeout`; `None` if the task is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.slot.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return Some(outcome.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            guard = match self.slot.ready.wait_timeout(guard, remaining) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Consumer-side half of a completion handle, owned by the task record.
#[derive(Debug)]
pub(crate) struct Completer {
    slot: Arc<Slot>,
}

impl Completer {
    pub(crate) fn new() -> (Self, CompletionHandle) {
        let slot = Arc::new(Slot::default());
        (
            Self { slot: slot.clone() },
            CompletionHandle { slot },
        )
    }

    /// Returns `false` when the slot was already resolved.
    pub(crate) fn complete(&self, snapshot: TaskSnapshot) -> bool {
        self.resolve(TaskOutcome::Completed(snapshot))
    }

    pub(crate) fn cancel(&self) -> bool {
        self.resolve(TaskOutcome::Cancelled)
    }

    fn resolve(&self, outcome: TaskOutcome) -> bool {
        let mut guard = self.slot.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(outcome);
        drop(guard);
        self.slot.ready.notify_all();
        true
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        self.resolve(TaskOutcome::Dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TaskKey;
    use chrono::Utc;
    use std::thread;
    use wikitask_core::{DocumentId, TaskType, TenantId, Version};

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot {
            key: TaskKey::new(TenantId::new("wikiA"), TaskType::new("links"), DocumentId::new(1)),
            version: Version::new("1.1"),
            due_time: Utc::now(),
            attempts: 1,
        }
    }

    #[test]
    fn pending_handle_times_out() {
        let (_completer, handle) = Completer::new();
        assert!(!handle.is_done());
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn first_resolution_wins() {
        let (completer, handle) = Completer::new();
        assert!(completer.cancel());
        assert!(!completer.complete(snapshot()));
        assert!(handle.is_cancelled());
        assert_eq!(handle.outcome(), Some(TaskOutcome::Cancelled));
    }

    #[test]
    fn wait_wakes_on_completion_from_another_thread() {
        let (completer, handle) = Completer::new();
        let expected = snapshot();
        let sent = expected.clone();

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(sent);
        });

        assert_eq!(handle.clone().wait(), TaskOutcome::Completed(expected));
        assert!(!handle.is_cancelled());
        t.join().unwrap();
    }

    #[test]
    fn dropping_unresolved_completer_wakes_waiters() {
        let (completer, handle) = Completer::new();
        let waiter = handle.clone();
        let t = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(20));
        drop(completer);

        assert_eq!(t.join().unwrap(), TaskOutcome::Dropped);
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn drop_keeps_an_earlier_resolution() {
        let (completer, handle) = Completer::new();
        completer.complete(snapshot());
        drop(completer);
        assert!(matches!(handle.outcome(), Some(TaskOutcome::Completed(_))));
    }
}

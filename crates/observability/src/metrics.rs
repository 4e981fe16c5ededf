//! Queue metrics.
//!
//! The scheduler reports through the [`QueueMetrics`] port so it carries no
//! dependency on a particular monitoring backend. Exporters (Prometheus, JMX
//! bridges, ...) implement the trait outside this workspace.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

/// Observability port for the task queue.
///
/// Counters are keyed by task type; `queue_depth` is a gauge reporting the
/// total number of queued records after each change.
pub trait QueueMetrics: Send + Sync {
    fn task_enqueued(&self, task_type: &str);
    fn task_completed(&self, task_type: &str);
    fn task_retried(&self, task_type: &str);
    fn task_abandoned(&self, task_type: &str);
    fn task_replaced(&self, task_type: &str);
    fn queue_depth(&self, depth: usize);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl QueueMetrics for NoopMetrics {
    fn task_enqueued(&self, _task_type: &str) {}
    fn task_completed(&self, _task_type: &str) {}
    fn task_retried(&self, _task_type: &str) {}
    fn task_abandoned(&self, _task_type: &str) {}
    fn task_replaced(&self, _task_type: &str) {}
    fn queue_depth(&self, _depth: usize) {}
}

/// Per task type counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskTypeCounters {
    pub enqueued: u64,
    pub completed: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub replaced: u64,
}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_depth: usize,
    pub by_task_type: BTreeMap<String, TaskTypeCounters>,
}

impl MetricsSnapshot {
    pub fn counters(&self, task_type: &str) -> TaskTypeCounters {
        self.by_task_type.get(task_type).cloned().unwrap_or_default()
    }
}

/// In-process metrics registry for tests/dev and for polling exporters.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.inner.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn bump(&self, task_type: &str, f: impl FnOnce(&mut TaskTypeCounters)) {
        // A poisoned lock only means a panic elsewhere; keep counting.
        let mut s = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(s.by_task_type.entry(task_type.to_string()).or_default());
    }
}

impl QueueMetrics for InMemoryMetrics {
    fn task_enqueued(&self, task_type: &str) {
        self.bump(task_type, |c| c.enqueued += 1);
    }

    fn task_completed(&self, task_type: &str) {
        self.bump(task_type, |c| c.completed += 1);
    }

    fn task_retried(&self, task_type: &str) {
        self.bump(task_type, |c| c.retried += 1);
    }

    fn task_abandoned(&self, task_type: &str) {
        self.bump(task_type, |c| c.abandoned += 1);
    }

    fn task_replaced(&self, task_type: &str) {
        self.bump(task_type, |c| c.replaced += 1);
    }

    fn queue_depth(&self, depth: usize) {
        let mut s = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        s.queue_depth = depth;
    }
}

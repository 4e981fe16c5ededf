//! Task record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wikitask_core::{DocumentId, TaskType, TenantId, Version};

use crate::handle::{Completer, CompletionHandle};

/// Deduplication identity of a task.
///
/// The version is intentionally not part of the key: a newer revision of the
/// same document supersedes queued work for an older one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub tenant_id: TenantId,
    pub task_type: TaskType,
    pub document_id: DocumentId,
}

impl TaskKey {
    pub fn new(tenant_id: TenantId, task_type: TaskType, document_id: DocumentId) -> Self {
        Self {
            tenant_id,
            task_type,
            document_id,
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.task_type, self.document_id)
    }
}

/// One unit of queued work.
///
/// Built once by a producer (or by recovery) and handed to the queue. After
/// that only the consumer thread touches `attempts` and `due_time`.
#[derive(Debug)]
pub struct TaskRecord {
    key: TaskKey,
    version: Version,
    due_time: DateTime<Utc>,
    attempts: u32,
    completion: Completer,
}

impl TaskRecord {
    /// Create a record and the handle its producer observes.
    pub fn new(key: TaskKey, version: Version, due_time: DateTime<Utc>) -> (Self, CompletionHandle) {
        let (completion, handle) = Completer::new();
        let record = Self {
            key,
            version,
            due_time,
            attempts: 0,
            completion,
        };
        (record, handle)
    }

    /// Rebuild a record from its persisted row (startup recovery).
    ///
    /// Nobody holds the returned handle's twin yet; callers usually drop it.
    pub fn from_row(row: TaskRow) -> (Self, CompletionHandle) {
        let key = TaskKey::new(row.tenant_id, row.task_type, row.document_id);
        Self::new(key, row.version, row.due_time)
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.key.tenant_id
    }

    pub fn document_id(&self) -> DocumentId {
        self.key.document_id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.key.task_type
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn due_time(&self) -> DateTime<Utc> {
        self.due_time
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Plain-data copy handed to producers on completion.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            key: self.key.clone(),
            version: self.version.clone(),
            due_time: self.due_time,
            attempts: self.attempts,
        }
    }

    /// Durable shape of this record, tagged with the owning scheduler instance.
    pub fn to_row(&self, instance_id: Uuid) -> TaskRow {
        TaskRow {
            tenant_id: self.key.tenant_id.clone(),
            document_id: self.key.document_id,
            version: self.version.clone(),
            task_type: self.key.task_type.clone(),
            due_time: self.due_time,
            instance_id,
        }
    }

    /// Count a new attempt; returns the updated counter.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// Move the record behind work that is already due.
    pub(crate) fn reschedule(&mut self, now: DateTime<Utc>) {
        self.due_time = now;
    }

    pub(crate) fn complete(&self) -> bool {
        self.completion.complete(self.snapshot())
    }

    pub(crate) fn cancel(&self) -> bool {
        self.completion.cancel()
    }
}

/// Immutable view of a task at the moment it finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub key: TaskKey,
    pub version: Version,
    pub due_time: DateTime<Utc>,
    pub attempts: u32,
}

/// Persisted row, used only for crash recovery and completion bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub version: Version,
    pub task_type: TaskType,
    pub due_time: DateTime<Utc>,
    /// Scheduler instance that owns the row.
    pub instance_id: Uuid,
}

impl TaskRow {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.tenant_id.clone(), self.task_type.clone(), self.document_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TaskOutcome;

    fn key() -> TaskKey {
        TaskKey::new(TenantId::new("wikiA"), TaskType::new("links"), DocumentId::new(42))
    }

    #[test]
    fn record_lifecycle() {
        let created = Utc::now();
        let (mut record, handle) = TaskRecord::new(key(), Version::new("1.1"), created);
        assert_eq!(record.attempts(), 0);

        assert_eq!(record.begin_attempt(), 1);
        assert_eq!(record.begin_attempt(), 2);

        let later = created + chrono::Duration::seconds(3);
        record.reschedule(later);
        assert_eq!(record.due_time(), later);

        assert!(record.complete());
        match handle.outcome() {
            Some(TaskOutcome::Completed(snap)) => {
                assert_eq!(snap.key, key());
                assert_eq!(snap.attempts, 2);
                assert_eq!(snap.due_time, later);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert!(!record.cancel());
    }

    #[test]
    fn row_conversion_keeps_identity() {
        let instance = Uuid::now_v7();
        let (record, _handle) = TaskRecord::new(key(), Version::new("2.0"), Utc::now());
        let row = record.to_row(instance);
        assert_eq!(row.key(), key());
        assert_eq!(row.instance_id, instance);

        let (restored, _handle) = TaskRecord::from_row(row.clone());
        assert_eq!(restored.key(), record.key());
        assert_eq!(restored.version(), record.version());
        assert_eq!(restored.due_time(), row.due_time);
        assert_eq!(restored.attempts(), 0);
    }

    #[test]
    fn key_display_is_path_like() {
        assert_eq!(key().to_string(), "wikiA/links/42");
    }
}

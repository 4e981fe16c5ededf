//! Persistent task storage.
//!
//! The store only exists for crash recovery and completion bookkeeping; the
//! in-memory queue owns ordering, so no ordering guarantees are required here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use wikitask_core::{DocumentId, TaskType, TenantId, Version};

use crate::record::{TaskKey, TaskRow};

/// Durable CRUD for task rows.
pub trait TaskStore: Send + Sync {
    /// Persist a new row.
    fn add(&self, row: &TaskRow) -> Result<(), TaskStoreError>;

    /// Drop every row with the same `(tenant, task type, document)` and persist `row`.
    fn replace(&self, row: &TaskRow) -> Result<(), TaskStoreError>;

    /// Rows of one tenant owned by one scheduler instance.
    fn get_all(&self, tenant_id: &TenantId, instance_id: Uuid) -> Result<Vec<TaskRow>, TaskStoreError>;

    /// Remove the row of a finished (or abandoned) task.
    fn delete(
        &self,
        tenant_id: &TenantId,
        document_id: DocumentId,
        version: &Version,
        task_type: &TaskType,
    ) -> Result<(), TaskStoreError>;
}

/// Task store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task store unavailable")]
    Unavailable,
    #[error("storage error: {0}")]
    Storage(String),
}

impl<S: TaskStore + ?Sized> TaskStore for Arc<S> {
    fn add(&self, row: &TaskRow) -> Result<(), TaskStoreError> {
        (**self).add(row)
    }

    fn replace(&self, row: &TaskRow) -> Result<(), TaskStoreError> {
        (**self).replace(row)
    }

    fn get_all(&self, tenant_id: &TenantId, instance_id: Uuid) -> Result<Vec<TaskRow>, TaskStoreError> {
        (**self).get_all(tenant_id, instance_id)
    }

    fn delete(
        &self,
        tenant_id: &TenantId,
        document_id: DocumentId,
        version: &Version,
        task_type: &TaskType,
    ) -> Result<(), TaskStoreError> {
        (**self).delete(tenant_id, document_id, version, task_type)
    }
}

/// Row identity: a key may hold several versions until they are replaced.
type RowId = (TaskKey, Version);

/// In-memory task store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    rows: RwLock<HashMap<RowId, TaskRow>>,
    failing: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every write fail with [`TaskStoreError::Unavailable`] (reads still work).
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rows, regardless of tenant or owner.
    pub fn rows(&self) -> Vec<TaskRow> {
        self.rows.read().unwrap().values().cloned().collect()
    }

    fn check_writable(&self) -> Result<(), TaskStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TaskStoreError::Unavailable);
        }
        Ok(())
    }
}

impl TaskStore for InMemoryTaskStore {
    fn add(&self, row: &TaskRow) -> Result<(), TaskStoreError> {
        self.check_writable()?;
        let mut rows = self.rows.write().unwrap();
        rows.insert((row.key(), row.version.clone()), row.clone());
        Ok(())
    }

    fn replace(&self, row: &TaskRow) -> Result<(), TaskStoreError> {
        self.check_writable()?;
        let key = row.key();
        let mut rows = self.rows.write().unwrap();
        rows.retain(|(k, _), _| *k != key);
        rows.insert((key, row.version.clone()), row.clone());
        Ok(())
    }

    fn get_all(&self, tenant_id: &TenantId, instance_id: Uuid) -> Result<Vec<TaskRow>, TaskStoreError> {
        let rows = self.rows.read().unwrap();
        let mut result: Vec<_> = rows
            .values()
            .filter(|r| &r.tenant_id == tenant_id && r.instance_id == instance_id)
            .cloned()
            .collect();

        result.sort_by_key(|r| r.due_time);
        Ok(result)
    }

    fn delete(
        &self,
        tenant_id: &TenantId,
        document_id: DocumentId,
        version: &Version,
        task_type: &TaskType,
    ) -> Result<(), TaskStoreError> {
        self.check_writable()?;
        let key = TaskKey::new(tenant_id.clone(), task_type.clone(), document_id);
        let mut rows = self.rows.write().unwrap();
        rows.remove(&(key, version.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(tenant: &str, doc: i64, version: &str, instance_id: Uuid) -> TaskRow {
        TaskRow {
            tenant_id: TenantId::new(tenant),
            document_id: DocumentId::new(doc),
            version: Version::new(version),
            task_type: TaskType::new("links"),
            due_time: Utc::now(),
            instance_id,
        }
    }

    #[test]
    fn add_and_get_all_filters_by_tenant_and_instance() {
        let store = InMemoryTaskStore::new();
        let mine = Uuid::now_v7();
        let other = Uuid::now_v7();

        store.add(&row("wikiA", 1, "1.0", mine)).unwrap();
        store.add(&row("wikiA", 2, "1.0", other)).unwrap();
        store.add(&row("wikiB", 3, "1.0", mine)).unwrap();

        let rows = store.get_all(&TenantId::new("wikiA"), mine).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].document_id, DocumentId::new(1));
    }

    #[test]
    fn replace_supersedes_other_versions_of_the_key() {
        let store = InMemoryTaskStore::new();
        let instance = Uuid::now_v7();

        store.add(&row("wikiA", 1, "1.0", instance)).unwrap();
        store.add(&row("wikiA", 1, "1.1", instance)).unwrap();
        store.add(&row("wikiA", 2, "1.0", instance)).unwrap();
        assert_eq!(store.len(), 3);

        store.replace(&row("wikiA", 1, "1.2", instance)).unwrap();

        let versions: Vec<_> = store
            .get_all(&TenantId::new("wikiA"), instance)
            .unwrap()
            .into_iter()
            .filter(|r| r.document_id == DocumentId::new(1))
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![Version::new("1.2")]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn delete_removes_exact_version() {
        let store = InMemoryTaskStore::new();
        let instance = Uuid::now_v7();
        store.add(&row("wikiA", 1, "1.0", instance)).unwrap();
        store.add(&row("wikiA", 1, "1.1", instance)).unwrap();

        store
            .delete(&TenantId::new("wikiA"), DocumentId::new(1), &Version::new("1.0"), &TaskType::new("links"))
            .unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, Version::new("1.1"));
    }

    #[test]
    fn failing_writes_report_unavailable() {
        let store = InMemoryTaskStore::new();
        store.fail_writes(true);
        let err = store.add(&row("wikiA", 1, "1.0", Uuid::now_v7())).unwrap_err();
        assert!(matches!(err, TaskStoreError::Unavailable));
        assert!(store.is_empty());

        store.fail_writes(false);
        store.add(&row("wikiA", 1, "1.0", Uuid::now_v7())).unwrap();
        assert_eq!(store.len(), 1);
    }
}

//! Pluggable per-type task consumers.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use wikitask_core::{TaskType, Version};

use crate::document::DocumentReference;

/// Does the actual document work for one task type.
///
/// The scheduler may run the same input more than once (retries), so
/// implementations must be idempotent or tolerate redundant execution.
pub trait TaskConsumer: Send + Sync {
    fn consume(&self, document: &DocumentReference, version: &Version) -> anyhow::Result<()>;
}

impl<F> TaskConsumer for F
where
    F: Fn(&DocumentReference, &Version) -> anyhow::Result<()> + Send + Sync,
{
    fn consume(&self, document: &DocumentReference, version: &Version) -> anyhow::Result<()> {
        self(document, version)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate consumer for task_type={0}")]
    Duplicate(TaskType),
}

/// Registry of consumers (task type -> consumer).
///
/// Built during initialization, read-only once handed to the executor.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<TaskType, Arc<dyn TaskConsumer>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: TaskType,
        consumer: Arc<dyn TaskConsumer>,
    ) -> Result<(), RegistryError> {
        if self.consumers.contains_key(&task_type) {
            return Err(RegistryError::Duplicate(task_type));
        }
        self.consumers.insert(task_type, consumer);
        Ok(())
    }

    /// Builder-style registration for wiring code.
    pub fn with(mut self, task_type: TaskType, consumer: Arc<dyn TaskConsumer>) -> Result<Self, RegistryError> {
        self.register(task_type, consumer)?;
        Ok(self)
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskConsumer>> {
        self.consumers.get(task_type)
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.consumers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

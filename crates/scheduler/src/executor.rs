//! Runs one task record against its consumer.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use wikitask_core::TaskType;

use crate::consumer::ConsumerRegistry;
use crate::context::{ExecutionContext, TenantGuard};
use crate::document::{DocumentResolver, ResolveError};
use crate::record::{TaskRecord, TaskSnapshot};
use crate::store::TaskStore;

/// Why a single execution failed.
///
/// The scheduler treats every variant as one failed attempt.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to resolve document: {0}")]
    DocumentResolution(#[from] ResolveError),

    #[error("no consumer registered for task_type={0}")]
    ConsumerLookup(TaskType),

    #[error("consumer for task_type={task_type} failed: {source}")]
    ConsumerExecution {
        task_type: TaskType,
        #[source]
        source: anyhow::Error,
    },
}

/// Dispatches a record to the consumer registered for its task type.
///
/// Side effects per call: one tenant switch in and one restore out; on
/// success the completion handle resolves and the persisted row is deleted;
/// on failure nothing is written (retry bookkeeping belongs to the scheduler).
pub struct TaskExecutor {
    registry: Arc<ConsumerRegistry>,
    documents: Arc<dyn DocumentResolver>,
    store: Arc<dyn TaskStore>,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<ConsumerRegistry>,
        documents: Arc<dyn DocumentResolver>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            registry,
            documents,
            store,
        }
    }

    pub fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    /// Execute one record inside its tenant's context.
    pub fn execute(
        &self,
        context: &dyn ExecutionContext,
        record: &TaskRecord,
    ) -> Result<TaskSnapshot, ExecutionError> {
        let _tenant = TenantGuard::enter(context, record.tenant_id());

        let document =
            self.documents
                .resolve(record.tenant_id(), record.document_id(), record.version())?;

        let consumer = self
            .registry
            .get(record.task_type())
            .ok_or_else(|| ExecutionError::ConsumerLookup(record.task_type().clone()))?;

        // A panicking consumer is a failed attempt, not a dead consumer thread.
        let result = catch_unwind(AssertUnwindSafe(|| consumer.consume(&document, record.version())))
            .unwrap_or_else(|panic| Err(anyhow::anyhow!("consumer panicked: {}", panic_message(&*panic))));

        result.map_err(|source| ExecutionError::ConsumerExecution {
            task_type: record.task_type().clone(),
            source,
        })?;

        record.complete();
        debug!(
            tenant = %record.tenant_id(),
            document = %record.document_id(),
            version = %record.version(),
            task_type = %record.task_type(),
            attempt = record.attempts(),
            "task completed"
        );

        // The work is done either way; a stale row is only re-run after a crash.
        if let Err(e) = self.store.delete(
            record.tenant_id(),
            record.document_id(),
            record.version(),
            record.task_type(),
        ) {
            warn!(key = %record.key(), error = %e, "failed to delete completed task row");
        }

        Ok(record.snapshot())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

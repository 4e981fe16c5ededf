//! Background task scheduler for a multi-tenant wiki.
//!
//! ## Design
//!
//! - Tasks are keyed by `(tenant, task type, document)` and carry a version
//! - One consumer thread executes tasks in due-time order
//! - Failed tasks are retried immediately, up to a bounded number of attempts
//! - Tasks are persisted so a restarted instance can recover its own work
//! - Replacing a task drops queued work for the same key
//!
//! ## Components
//!
//! - `TaskRecord`: one unit of work plus its completion handle
//! - `TaskQueue`: due-time priority queue with a stop signal
//! - `TaskExecutor`: runs one record inside its tenant context
//! - `TaskStore`: persistence for crash recovery
//! - `TaskScheduler`: producer API and the consume loop

pub mod clock;
pub mod config;
pub mod consumer;
pub mod context;
pub mod document;
pub mod executor;
pub mod handle;
pub mod queue;
pub mod record;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_NAME, SchedulerConfig};
pub use consumer::{ConsumerRegistry, RegistryError, TaskConsumer};
pub use context::{ExecutionContext, InMemoryExecutionContext, TenantGuard};
pub use document::{DocumentReference, DocumentResolver, PassthroughResolver, ResolveError};
pub use executor::{ExecutionError, TaskExecutor};
pub use handle::{CompletionHandle, TaskOutcome};
pub use queue::{Interrupted, QueueEntry, TaskQueue};
pub use record::{TaskKey, TaskRecord, TaskRow, TaskSnapshot};
pub use scheduler::{SchedulerError, SchedulerStats, TaskScheduler, TaskSchedulerBuilder, TenantDirectory};
pub use store::{InMemoryTaskStore, TaskStore, TaskStoreError};

pub use wikitask_core::{DocumentId, TaskType, TenantId, Version};

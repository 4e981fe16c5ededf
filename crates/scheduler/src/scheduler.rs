//! Task scheduler: producer API plus the single consumer thread.
//!
//! ## Lifecycle
//!
//! - `add_task` / `replace_task` may be called from any thread, before or after `start`
//! - `start` spawns exactly one consumer thread; the first thing it does is
//!   recover persisted rows owned by this instance
//! - `stop` enqueues the stop signal, which the consumer takes next (pending
//!   work is left queued, not drained)
//! - `join` waits for the consumer thread to exit
//!
//! A scheduler is started at most once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use serde::Serialize;
use thiserror::Error;
use thread_priority::{ThreadPriority, set_current_thread_priority};
use tracing::{debug, error, info, warn};

use wikitask_core::{DocumentId, TaskType, TenantId, Version};
use wikitask_observability::{NoopMetrics, QueueMetrics};

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::consumer::ConsumerRegistry;
use crate::context::{ExecutionContext, InMemoryExecutionContext};
use crate::document::{DocumentResolver, PassthroughResolver};
use crate::executor::{ExecutionError, TaskExecutor};
use crate::handle::CompletionHandle;
use crate::queue::{Interrupted, QueueEntry, TaskQueue};
use crate::record::{TaskKey, TaskRecord};
use crate::store::TaskStore;

/// Lists the tenants whose persisted tasks are recovered at startup.
pub trait TenantDirectory: Send + Sync {
    fn tenants(&self) -> Vec<TenantId>;
}

impl TenantDirectory for Vec<TenantId> {
    fn tenants(&self) -> Vec<TenantId> {
        self.clone()
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler already started")]
    AlreadyStarted,
    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Executions attempted (successes and failures).
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub abandoned: u64,
    /// Queued records dropped by `replace_task`.
    pub replaced: u64,
    /// Rows re-enqueued from the store at startup.
    pub recovered: u64,
    pub running: bool,
    /// The consumer thread runs below normal priority.
    pub low_priority: bool,
}

struct Shared {
    config: SchedulerConfig,
    queue: TaskQueue,
    store: Arc<dyn TaskStore>,
    executor: TaskExecutor,
    context: Arc<dyn ExecutionContext>,
    tenants: Arc<dyn TenantDirectory>,
    metrics: Arc<dyn QueueMetrics>,
    clock: Arc<dyn Clock>,
    stop_requested: AtomicBool,
    stats: Mutex<SchedulerStats>,
    // Producers hold it shared around persist + enqueue; recovery holds it
    // exclusively, so a row is never both recovered and enqueued by its producer.
    intake: RwLock<()>,
}

impl Shared {
    fn stats(&self) -> MutexGuard<'_, SchedulerStats> {
        match self.stats.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn admit(&self) -> RwLockReadGuard<'_, ()> {
        match self.intake.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn pause_intake(&self) -> RwLockWriteGuard<'_, ()> {
        match self.intake.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn enqueue(&self, record: TaskRecord) {
        let task_type = record.task_type().clone();
        let depth = self.queue.push(record);
        self.metrics.task_enqueued(task_type.as_str());
        self.metrics.queue_depth(depth);
    }

    fn recover(&self) {
        let _intake = self.pause_intake();
        let mut recovered = 0u64;

        for tenant in self.tenants.tenants() {
            let rows = match self.store.get_all(&tenant, self.config.instance_id) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(
                        scheduler = %self.config.name,
                        tenant = %tenant,
                        error = %e,
                        "failed to load persisted tasks; skipping tenant"
                    );
                    continue;
                }
            };

            for row in rows {
                // Added before `start`: already queued with a live handle.
                if self.queue.contains_version(&row.key(), &row.version) {
                    continue;
                }
                let (record, _handle) = TaskRecord::from_row(row);
                self.enqueue(record);
                recovered += 1;
            }
        }

        self.stats().recovered += recovered;
        info!(scheduler = %self.config.name, recovered, "recovered persisted tasks");
    }

    fn on_success(&self, record: &TaskRecord) {
        {
            let mut s = self.stats();
            s.processed += 1;
            s.succeeded += 1;
        }
        self.metrics.task_completed(record.task_type().as_str());
    }

    fn on_failure(&self, mut record: TaskRecord, err: ExecutionError) {
        let task_type = record.task_type().clone();
        self.stats().processed += 1;

        if self.config.should_retry(record.attempts()) {
            warn!(
                scheduler = %self.config.name,
                key = %record.key(),
                version = %record.version(),
                attempt = record.attempts(),
                error = %err,
                "task failed; retrying"
            );
            record.reschedule(self.clock.now());
            self.stats().retried += 1;
            self.metrics.task_retried(task_type.as_str());
            self.enqueue(record);
            return;
        }

        error!(
            scheduler = %self.config.name,
            key = %record.key(),
            version = %record.version(),
            attempts = record.attempts(),
            error = %err,
            "task abandoned after too many failures"
        );
        record.cancel();
        if let Err(e) = self.store.delete(
            record.tenant_id(),
            record.document_id(),
            record.version(),
            record.task_type(),
        ) {
            warn!(key = %record.key(), error = %e, "failed to delete abandoned task row");
        }
        self.stats().abandoned += 1;
        self.metrics.task_abandoned(task_type.as_str());
    }
}

/// Background work yields to request handling threads. Best effort.
fn lower_priority(name: &str) -> bool {
    match set_current_thread_priority(ThreadPriority::Min) {
        Ok(()) => true,
        Err(e) => {
            warn!(scheduler = %name, error = ?e, "could not lower consumer thread priority");
            false
        }
    }
}

fn consume_loop(shared: &Shared) {
    let low_priority = lower_priority(&shared.config.name);
    shared.stats().low_priority = low_priority;
    info!(
        scheduler = %shared.config.name,
        instance = %shared.config.instance_id,
        "task scheduler started"
    );
    shared.stats().running = true;
    shared.recover();

    loop {
        let entry = match shared.queue.take() {
            Ok(entry) => entry,
            Err(Interrupted) => {
                if shared.stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                debug!(scheduler = %shared.config.name, "consumer interrupted; continuing");
                continue;
            }
        };

        let mut record = match entry {
            QueueEntry::Stop => break,
            QueueEntry::Work(record) => record,
        };

        let attempt = record.begin_attempt();
        debug!(
            scheduler = %shared.config.name,
            key = %record.key(),
            version = %record.version(),
            attempt,
            "dequeued task"
        );

        match shared.executor.execute(shared.context.as_ref(), &record) {
            Ok(_) => shared.on_success(&record),
            Err(err) => shared.on_failure(record, err),
        }
        shared.metrics.queue_depth(shared.queue.len());
    }

    shared.stats().running = false;
    info!(
        scheduler = %shared.config.name,
        pending = shared.queue.len(),
        "task scheduler stopped"
    );
}

/// Background task scheduler.
///
/// Serializes and retries one background task per `(tenant, document, task type)`.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    started: AtomicBool,
    consumer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Start wiring a scheduler around a consumer registry and a task store.
    pub fn builder(registry: ConsumerRegistry, store: Arc<dyn TaskStore>) -> TaskSchedulerBuilder {
        TaskSchedulerBuilder::new(registry, store)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn instance_id(&self) -> uuid::Uuid {
        self.shared.config.instance_id
    }

    /// Persist (best effort) and enqueue a task.
    ///
    /// A persistence failure is logged; the task still runs this session but
    /// will not survive a crash before it completes.
    pub fn add_task(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        version: Version,
        task_type: TaskType,
    ) -> CompletionHandle {
        let shared = &self.shared;
        let _intake = shared.admit();
        let key = TaskKey::new(tenant_id, task_type, document_id);
        let (record, handle) = TaskRecord::new(key, version, shared.clock.now());

        if let Err(e) = shared.store.add(&record.to_row(shared.config.instance_id)) {
            warn!(
                scheduler = %shared.config.name,
                key = %record.key(),
                error = %e,
                "failed to persist task; it will not survive a crash"
            );
        }

        debug!(scheduler = %shared.config.name, key = %record.key(), version = %record.version(), "task added");
        shared.enqueue(record);
        handle
    }

    /// Persist and enqueue a task, superseding queued work for the same key.
    ///
    /// Every queued (not yet dequeued) record with the same
    /// `(tenant, task type, document)` is removed and its handle cancelled.
    /// A task already running is not interrupted.
    pub fn replace_task(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
        version: Version,
        task_type: TaskType,
    ) -> CompletionHandle {
        let shared = &self.shared;
        let _intake = shared.admit();
        let key = TaskKey::new(tenant_id, task_type.clone(), document_id);
        let (record, handle) = TaskRecord::new(key, version, shared.clock.now());

        if let Err(e) = shared.store.replace(&record.to_row(shared.config.instance_id)) {
            warn!(
                scheduler = %shared.config.name,
                key = %record.key(),
                error = %e,
                "failed to persist replacement task; it will not survive a crash"
            );
        }

        let superseded = shared.queue.replace(record);
        for old in &superseded {
            old.cancel();
            shared.metrics.task_replaced(task_type.as_str());
            debug!(
                scheduler = %shared.config.name,
                key = %old.key(),
                version = %old.version(),
                "superseded queued task"
            );
        }
        shared.stats().replaced += superseded.len() as u64;

        shared.metrics.task_enqueued(task_type.as_str());
        shared.metrics.queue_depth(shared.queue.len());
        handle
    }

    /// Spawn the consumer thread.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.config.name.clone())
            .spawn(move || consume_loop(&shared));

        match spawned {
            Ok(join) => {
                *self.consumer_slot() = Some(join);
                Ok(())
            }
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                Err(SchedulerError::Spawn(e))
            }
        }
    }

    /// Halt the consumer as soon as it finishes the task in hand.
    ///
    /// Work still queued stays queued; persisted rows are recovered by the
    /// next scheduler started with the same instance id.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.queue.push_stop();
        info!(
            scheduler = %self.shared.config.name,
            pending = self.shared.queue.len(),
            "stop requested"
        );
    }

    /// Wake the consumer if it is blocked waiting for work.
    ///
    /// Not counted as a task failure; the loop exits only if stop was requested.
    pub fn interrupt(&self) {
        self.shared.queue.interrupt();
    }

    /// Wait for the consumer thread to exit. No-op if it never started.
    pub fn join(&self) {
        let join = self.consumer_slot().take();
        if let Some(j) = join {
            if j.join().is_err() {
                error!(scheduler = %self.shared.config.name, "consumer thread panicked");
            }
        }
    }

    /// `stop` followed by `join`.
    pub fn shutdown(&self) {
        self.stop();
        self.join();
    }

    /// Number of queued tasks (in-flight work is not counted).
    pub fn queue_size(&self) -> usize {
        self.shared.queue.len()
    }

    /// Number of queued tasks of one type.
    pub fn queue_size_of(&self, task_type: &TaskType) -> usize {
        self.shared.queue.len_of(task_type)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats().clone()
    }

    fn consumer_slot(&self) -> MutexGuard<'_, Option<thread::JoinHandle<()>>> {
        match self.consumer.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if self.consumer_slot().is_some() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.shared.config)
            .field("queue_size", &self.queue_size())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Wires a [`TaskScheduler`]; every collaborator except the registry and the
/// store has an in-process default.
pub struct TaskSchedulerBuilder {
    registry: ConsumerRegistry,
    store: Arc<dyn TaskStore>,
    config: SchedulerConfig,
    context: Arc<dyn ExecutionContext>,
    documents: Arc<dyn DocumentResolver>,
    tenants: Arc<dyn TenantDirectory>,
    metrics: Arc<dyn QueueMetrics>,
    clock: Arc<dyn Clock>,
}

impl TaskSchedulerBuilder {
    pub fn new(registry: ConsumerRegistry, store: Arc<dyn TaskStore>) -> Self {
        Self {
            registry,
            store,
            config: SchedulerConfig::default(),
            context: Arc::new(InMemoryExecutionContext::new()),
            documents: Arc::new(PassthroughResolver),
            tenants: Arc::new(Vec::<TenantId>::new()),
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = context;
        self
    }

    pub fn documents(mut self, documents: Arc<dyn DocumentResolver>) -> Self {
        self.documents = documents;
        self
    }

    pub fn tenants(mut self, tenants: Arc<dyn TenantDirectory>) -> Self {
        self.tenants = tenants;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn QueueMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> TaskScheduler {
        let executor = TaskExecutor::new(Arc::new(self.registry), self.documents, self.store.clone());
        TaskScheduler {
            shared: Arc::new(Shared {
                config: self.config,
                queue: TaskQueue::new(),
                store: self.store,
                executor,
                context: self.context,
                tenants: self.tenants,
                metrics: self.metrics,
                clock: self.clock,
                stop_requested: AtomicBool::new(false),
                stats: Mutex::new(SchedulerStats::default()),
                intake: RwLock::new(()),
            }),
            started: AtomicBool::new(false),
            consumer: Mutex::new(None),
        }
    }
}

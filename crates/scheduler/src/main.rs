use std::sync::Arc;

use wikitask_observability::InMemoryMetrics;
use wikitask_scheduler::{
    CompletionHandle, ConsumerRegistry, DocumentId, DocumentReference, InMemoryTaskStore, SchedulerConfig,
    TaskScheduler, TaskType, TenantId, Version,
};

fn main() -> anyhow::Result<()> {
    wikitask_observability::init();

    let config = SchedulerConfig::from_env();
    let tenant = std::env::var("WIKITASK_TENANT").unwrap_or_else(|_| {
        tracing::warn!("WIKITASK_TENANT not set; using dev default");
        "main".to_string()
    });
    let tenant: TenantId = tenant.parse()?;

    let links = |doc: &DocumentReference, version: &Version| -> anyhow::Result<()> {
        tracing::info!(document = %doc, version = %version, "refreshing link table");
        Ok(())
    };
    let registry = ConsumerRegistry::new().with(TaskType::new("links"), Arc::new(links))?;

    let metrics = Arc::new(InMemoryMetrics::new());
    let scheduler = TaskScheduler::builder(registry, InMemoryTaskStore::arc())
        .config(config)
        .metrics(metrics.clone())
        .tenants(Arc::new(vec![tenant.clone()]))
        .build();

    // Each argument is a document id to re-index at version "1".
    let handles = std::env::args()
        .skip(1)
        .map(|arg| -> anyhow::Result<CompletionHandle> {
            let document_id: DocumentId = arg.parse()?;
            Ok(scheduler.add_task(tenant.clone(), document_id, Version::new("1"), TaskType::new("links")))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    scheduler.start()?;
    for handle in &handles {
        handle.wait();
    }
    scheduler.shutdown();

    tracing::info!(
        stats = %serde_json::to_string(&scheduler.stats())?,
        metrics = %serde_json::to_string(&metrics.snapshot())?,
        "done"
    );
    Ok(())
}

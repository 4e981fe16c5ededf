//! Execution context: which tenant the current task runs for.
//!
//! The executor receives the context as a parameter and switches it through
//! [`TenantGuard`], which restores the previous tenant when dropped (normal
//! return, `?` early exit, or unwinding panic).

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use wikitask_core::TenantId;

/// Get/set the "current tenant" seen by consumers and the document layer.
pub trait ExecutionContext: Send + Sync {
    fn current_tenant(&self) -> Option<TenantId>;
    fn set_current_tenant(&self, tenant: Option<TenantId>);
}

/// Scoped tenant switch.
#[must_use = "the previous tenant is restored when the guard is dropped"]
pub struct TenantGuard<'a> {
    context: &'a dyn ExecutionContext,
    previous: Option<TenantId>,
}

impl<'a> TenantGuard<'a> {
    pub fn enter(context: &'a dyn ExecutionContext, tenant: &TenantId) -> Self {
        let previous = context.current_tenant();
        context.set_current_tenant(Some(tenant.clone()));
        Self { context, previous }
    }
}

impl Drop for TenantGuard<'_> {
    fn drop(&mut self) {
        self.context.set_current_tenant(self.previous.take());
    }
}

/// Mutex-backed context for tests/dev.
///
/// Counts every `set_current_tenant` call so tests can assert on the
/// enter/restore pairing.
#[derive(Debug, Default)]
pub struct InMemoryExecutionContext {
    current: Mutex<Option<TenantId>>,
    switches: AtomicUsize,
}

impl InMemoryExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(tenant: TenantId) -> Self {
        Self {
            current: Mutex::new(Some(tenant)),
            switches: AtomicUsize::new(0),
        }
    }

    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }
}

impl ExecutionContext for InMemoryExecutionContext {
    fn current_tenant(&self) -> Option<TenantId> {
        match self.current.lock() {
            Ok(c) => c.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_current_tenant(&self, tenant: Option<TenantId>) {
        self.switches.fetch_add(1, Ordering::SeqCst);
        match self.current.lock() {
            Ok(mut c) => *c = tenant,
            Err(poisoned) => *poisoned.into_inner() = tenant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_tenant() {
        let ctx = InMemoryExecutionContext::with_tenant(TenantId::new("main"));
        {
            let _guard = TenantGuard::enter(&ctx, &TenantId::new("wikiA"));
            assert_eq!(ctx.current_tenant(), Some(TenantId::new("wikiA")));
        }
        assert_eq!(ctx.current_tenant(), Some(TenantId::new("main")));
        assert_eq!(ctx.switches(), 2);
    }

    #[test]
    fn guard_restores_on_panic() {
        let ctx = InMemoryExecutionContext::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = TenantGuard::enter(&ctx, &TenantId::new("wikiA"));
            panic!("consumer blew up");
        }));
        assert!(result.is_err());
        assert_eq!(ctx.current_tenant(), None);
    }
}

//! Resolving the document revision a task refers to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use wikitask_core::{DocumentId, TenantId, Version};

/// Reference to a document inside a tenant, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentReference {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
}

impl DocumentReference {
    pub fn new(tenant_id: TenantId, document_id: DocumentId) -> Self {
        Self {
            tenant_id,
            document_id,
        }
    }
}

impl std::fmt::Display for DocumentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.document_id)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("document {document_id} not found at version {version}")]
    NotFound { document_id: DocumentId, version: Version },
    #[error("document lookup failed: {0}")]
    Lookup(String),
}

/// Looks up `(document, version)` in the persistence layer.
///
/// Runs inside the task's tenant context.
pub trait DocumentResolver: Send + Sync {
    fn resolve(
        &self,
        tenant_id: &TenantId,
        document_id: DocumentId,
        version: &Version,
    ) -> Result<DocumentReference, ResolveError>;
}

/// Builds the reference straight from the task's identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughResolver;

impl DocumentResolver for PassthroughResolver {
    fn resolve(
        &self,
        tenant_id: &TenantId,
        document_id: DocumentId,
        _version: &Version,
    ) -> Result<DocumentReference, ResolveError> {
        Ok(DocumentReference::new(tenant_id.clone(), document_id))
    }
}

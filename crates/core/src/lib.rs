//! `wikitask-core`: identifiers shared by the scheduler and its collaborators.
//!
//! This crate contains **pure** value types (no threads, no IO).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{DocumentId, TaskType, TenantId, Version};

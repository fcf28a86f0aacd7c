//! Data models for the sync subsystem.
//!
//! These models represent the entities stored in the local SQLite database.
//! All models derive Serialize for host consumption and FromRow for SQLx.

pub mod audit_record;
pub mod queue_item;
pub mod repository_binding;

// Re-exports for convenient access
pub use audit_record::{AuditRecord, AuditStatus};
pub use queue_item::{
    CommitPayload, FileAction, FileChange, OperationKind, OperationPayload, QueueItem, QueueStatus,
};
pub use repository_binding::RepositoryBinding;

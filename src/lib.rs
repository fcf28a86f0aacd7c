//! Propagates a collaborative editing session's files into a remote GitHub
//! repository.
//!
//! Callers enqueue operations (repository creation, commits) into a SQLite
//! backed queue; a background sync worker claims them, executes them against
//! the GitHub Git Data API with the owning user's token, and records every
//! outcome in an append-only audit log. Each session is bound to one private
//! remote repository, created on demand by the bootstrapper.

pub mod db;
pub mod error;
pub mod models;
pub mod services;

#[cfg(test)]
mod test_support;

pub use db::pool::DbPool;
pub use error::SyncError;
pub use models::audit_record::AuditRecord;
pub use models::queue_item::{
    CommitPayload, FileAction, FileChange, OperationKind, OperationPayload, QueueItem,
};
pub use models::repository_binding::RepositoryBinding;
pub use services::sync_worker::{
    AccessTokenSource, BackoffPolicy, SyncWorker, WorkerConfig, WorkerHandle,
};

pub mod audit_log;
pub mod binding_store;
pub mod bootstrapper;
pub mod commit_pipeline;
pub mod github_client;
pub mod sync_queue;
pub mod sync_worker;

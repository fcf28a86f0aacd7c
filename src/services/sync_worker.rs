//! Sync worker.
//!
//! Drains the operation queue: claims one item at a time, runs it against
//! the remote with the owning user's credentials, and settles the outcome
//! into the queue and the audit log. Retryable failures go back to the
//! queue with a jittered delay; everything else fails terminally.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::queue_item::{OperationPayload, QueueItem};
use crate::services::github_client::{GitHubClient, GitHubClientConfig, RemoteObjects};
use crate::services::{audit_log, binding_store, bootstrapper, commit_pipeline, sync_queue};
use async_trait::async_trait;
use log::{error, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default interval between queue polls, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Resolves the remote access token for a user.
///
/// Tokens live outside this subsystem (session store, OAuth provider), so
/// the worker asks for them per operation instead of holding credentials.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self, user_id: &str) -> Result<String, SyncError>;
}

/// Builds a request-scoped remote client from an access token.
pub type ClientFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn RemoteObjects>, SyncError> + Send + Sync>;

/// Full-jitter exponential backoff between retries of one item.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt at the given retry count.
    ///
    /// Samples uniformly from zero up to the capped exponential bound, so
    /// concurrent retries spread out instead of stampeding the remote.
    pub fn delay(&self, retry_count: i64) -> Duration {
        let exponent = retry_count.clamp(0, 16) as u32;
        let bound = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        let jittered = rand::thread_rng().gen_range(0..=bound);
        Duration::from_millis(jittered)
    }
}

/// Sync worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the remote API.
    pub api_base: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Seconds between background queue polls.
    pub poll_interval_secs: u64,
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            timeout_secs: 30,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// How a processed item was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    /// Requeued for another attempt.
    Retried,
    /// Terminally failed.
    Failed,
}

/// Result of processing one claimed queue item.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub item_id: i64,
    pub disposition: Disposition,
    pub error: Option<String>,
    /// Suggested pause before the next claim, when the item was requeued.
    pub retry_delay: Option<Duration>,
}

/// Commands accepted by a running background worker.
#[derive(Debug)]
enum WorkerCommand {
    TriggerPoll,
    Stop,
}

/// Handle to a background worker task.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    /// Ask the worker to drain the queue now instead of waiting for the
    /// next poll tick.
    pub async fn trigger_poll(&self) {
        let _ = self.command_tx.send(WorkerCommand::TriggerPoll).await;
    }

    /// Stop the worker after its current item finishes.
    pub async fn stop(&self) {
        let _ = self.command_tx.send(WorkerCommand::Stop).await;
    }
}

/// Queue-draining worker.
pub struct SyncWorker {
    pool: DbPool,
    tokens: Arc<dyn AccessTokenSource>,
    config: WorkerConfig,
    client_factory: ClientFactory,
}

impl SyncWorker {
    pub fn new(pool: DbPool, tokens: Arc<dyn AccessTokenSource>, config: WorkerConfig) -> Self {
        let client_config = config.clone();
        let client_factory: ClientFactory = Arc::new(move |token: &str| {
            let client = GitHubClient::new(GitHubClientConfig {
                api_base: client_config.api_base.clone(),
                token: token.to_string(),
                timeout_secs: client_config.timeout_secs,
            })?;
            Ok(Arc::new(client) as Arc<dyn RemoteObjects>)
        });

        Self {
            pool,
            tokens,
            config,
            client_factory,
        }
    }

    /// Replace how remote clients are built. Tests use this to substitute
    /// an in-memory remote.
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = factory;
        self
    }

    /// Claim and execute the next eligible queue item.
    ///
    /// Returns `None` when the queue has nothing claimable. Operation
    /// failures are settled into the queue and audit log, not surfaced as
    /// errors; only infrastructure failures (database access) error out.
    pub async fn process_next(&self) -> Result<Option<ProcessOutcome>, SyncError> {
        let Some(item) = sync_queue::claim_next(&self.pool).await? else {
            return Ok(None);
        };

        match self.run_operation(&item).await {
            Ok(()) => {
                sync_queue::mark_completed(&self.pool, item.id).await?;
                audit_log::mark_completed(&self.pool, item.id).await?;
                info!("Operation {} ({}) completed", item.id, item.operation);

                Ok(Some(ProcessOutcome {
                    item_id: item.id,
                    disposition: Disposition::Completed,
                    error: None,
                    retry_delay: None,
                }))
            }
            Err(e) => self.settle_failure(&item, e).await.map(Some),
        }
    }

    /// Record a failed attempt: requeue while retryable attempts remain,
    /// otherwise fail terminally.
    async fn settle_failure(
        &self,
        item: &QueueItem,
        e: SyncError,
    ) -> Result<ProcessOutcome, SyncError> {
        let message = e.to_string();
        let next_retry_count = item.retry_count + 1;

        if e.is_retryable() && next_retry_count < item.max_retries {
            sync_queue::requeue_for_retry(&self.pool, item.id, &message).await?;
            audit_log::record_attempt_error(&self.pool, item.id, &message).await?;

            let delay = self.config.backoff.delay(next_retry_count);
            warn!(
                "Operation {} attempt {}/{} failed, retrying in {:?}: {}",
                item.id, next_retry_count, item.max_retries, delay, message
            );

            Ok(ProcessOutcome {
                item_id: item.id,
                disposition: Disposition::Retried,
                error: Some(message),
                retry_delay: Some(delay),
            })
        } else {
            sync_queue::mark_failed(&self.pool, item.id, &message).await?;
            audit_log::mark_failed(&self.pool, item.id, &message).await?;
            error!(
                "Operation {} failed terminally after {} attempt(s): {}",
                item.id, next_retry_count, message
            );

            Ok(ProcessOutcome {
                item_id: item.id,
                disposition: Disposition::Failed,
                error: Some(message),
                retry_delay: None,
            })
        }
    }

    /// Execute one claimed item against the remote.
    async fn run_operation(&self, item: &QueueItem) -> Result<(), SyncError> {
        let payload = item.decode_payload()?;
        let token = self.tokens.access_token(&item.user_id).await?;
        let api = (self.client_factory)(&token)?;

        match payload {
            OperationPayload::CreateRepo => {
                bootstrapper::ensure_repository(&self.pool, api.as_ref(), &item.session_id)
                    .await?;
                Ok(())
            }
            OperationPayload::Commit(commit) | OperationPayload::Sync(commit) => {
                let binding = binding_store::get_binding(&self.pool, &item.session_id)
                    .await?
                    .ok_or_else(|| {
                        SyncError::not_found_with_id("RepositoryBinding", &item.session_id)
                    })?;

                let result =
                    commit_pipeline::commit(&self.pool, api.as_ref(), &binding, &commit).await?;
                info!(
                    "Session {} synced to {} ({})",
                    item.session_id, result.sha, result.url
                );
                Ok(())
            }
        }
    }

    /// Drain the queue until it is empty, pausing for retry delays.
    async fn drain(&self) {
        loop {
            match self.process_next().await {
                Ok(Some(outcome)) => {
                    if let Some(delay) = outcome.retry_delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Queue processing stopped by database error: {}", e);
                    break;
                }
            }
        }
    }

    /// Run the worker on a background task, polling on an interval.
    ///
    /// The returned handle can force an immediate poll or stop the worker.
    pub fn start_background(self) -> WorkerHandle {
        let (command_tx, mut command_rx) = mpsc::channel(16);
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            info!(
                "Sync worker started (poll interval {}s)",
                poll_interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.drain().await;
                    }
                    command = command_rx.recv() => {
                        match command {
                            Some(WorkerCommand::TriggerPoll) => self.drain().await,
                            Some(WorkerCommand::Stop) | None => {
                                info!("Sync worker stopped");
                                break;
                            }
                        }
                    }
                }
            }
        });

        WorkerHandle { command_tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::queue_item::{CommitPayload, FileAction, FileChange};
    use crate::models::repository_binding::RepositoryBinding;
    use crate::services::sync_queue::EnqueueRequest;
    use crate::test_support::{FakeRemote, FakeTokens};
    use tempfile::tempdir;

    async fn setup_test_db() -> DbPool {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        std::mem::forget(dir);

        crate::db::initialize(&db_path).await.unwrap()
    }

    fn test_worker(pool: &DbPool, fake: Arc<FakeRemote>) -> SyncWorker {
        let config = WorkerConfig {
            backoff: BackoffPolicy {
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            ..WorkerConfig::default()
        };
        SyncWorker::new(pool.clone(), Arc::new(FakeTokens), config).with_client_factory(
            Arc::new(move |_token| Ok(fake.clone() as Arc<dyn RemoteObjects>)),
        )
    }

    async fn enqueue_create_repo(pool: &DbPool, session: &str) -> QueueItem {
        sync_queue::enqueue(
            pool,
            EnqueueRequest {
                session_id: session.to_string(),
                user_id: "user-1".to_string(),
                payload: OperationPayload::CreateRepo,
                priority: 10,
                max_retries: None,
            },
        )
        .await
        .unwrap()
    }

    async fn enqueue_commit(pool: &DbPool, session: &str) -> QueueItem {
        sync_queue::enqueue(
            pool,
            EnqueueRequest {
                session_id: session.to_string(),
                user_id: "user-1".to_string(),
                payload: OperationPayload::Commit(CommitPayload {
                    files: vec![FileChange {
                        path: "a.txt".into(),
                        content: Some("alpha".into()),
                        action: FileAction::Create,
                    }],
                    commit_message: "sync".into(),
                    branch: None,
                }),
                priority: 0,
                max_retries: None,
            },
        )
        .await
        .unwrap()
    }

    async fn bind_session(pool: &DbPool, session: &str) {
        binding_store::insert_if_absent(
            pool,
            &RepositoryBinding {
                session_id: session.to_string(),
                remote_repo_id: 42,
                repo_name: format!("codecollab-{}", session),
                repo_owner: "octocat".to_string(),
                repo_url: format!("https://github.com/octocat/codecollab-{}", session),
                is_private: true,
                last_synced_at: 100,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_empty_queue_yields_nothing() {
        let pool = setup_test_db().await;
        let worker = test_worker(&pool, Arc::new(FakeRemote::new()));

        assert!(worker.process_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_repo_operation_completes() {
        let pool = setup_test_db().await;
        let fake = Arc::new(FakeRemote::new());
        let worker = test_worker(&pool, fake.clone());

        let item = enqueue_create_repo(&pool, "s1").await;
        let outcome = worker.process_next().await.unwrap().unwrap();

        assert_eq!(outcome.item_id, item.id);
        assert_eq!(outcome.disposition, Disposition::Completed);

        let reloaded = sync_queue::get_item(&pool, item.id).await.unwrap();
        assert_eq!(reloaded.status, "completed");
        assert!(reloaded.processed_at.is_some());

        let audit = audit_log::get_for_queue_item(&pool, item.id).await.unwrap();
        assert_eq!(audit.status, "completed");

        let binding = binding_store::get_binding(&pool, "s1").await.unwrap();
        assert_eq!(binding.unwrap().repo_name, "codecollab-s1");
    }

    #[tokio::test]
    async fn test_commit_without_binding_fails_terminally() {
        let pool = setup_test_db().await;
        let fake = Arc::new(FakeRemote::new());
        let worker = test_worker(&pool, fake.clone());

        let item = enqueue_commit(&pool, "s1").await;
        let outcome = worker.process_next().await.unwrap().unwrap();

        // NotFound is not retryable, so the first attempt is terminal
        assert_eq!(outcome.disposition, Disposition::Failed);

        let reloaded = sync_queue::get_item(&pool, item.id).await.unwrap();
        assert_eq!(reloaded.status, "failed");

        let audit = audit_log::get_for_queue_item(&pool, item.id).await.unwrap();
        assert_eq!(audit.status, "failed");
        assert!(audit.error.is_some());
    }

    #[tokio::test]
    async fn test_retryable_failure_requeues_then_completes() {
        let pool = setup_test_db().await;
        bind_session(&pool, "s1").await;

        let fake = Arc::new(FakeRemote::with_branch("main", "head-0", "tree-0"));
        fake.state.lock().unwrap().ref_conflicts_remaining = 1;
        let worker = test_worker(&pool, fake.clone());

        let item = enqueue_commit(&pool, "s1").await;

        let first = worker.process_next().await.unwrap().unwrap();
        assert_eq!(first.disposition, Disposition::Retried);
        assert!(first.retry_delay.is_some());

        let requeued = sync_queue::get_item(&pool, item.id).await.unwrap();
        assert_eq!(requeued.status, "queued");
        assert_eq!(requeued.retry_count, 1);

        // The audit record stays pending across intermediate failures
        let audit = audit_log::get_for_queue_item(&pool, item.id).await.unwrap();
        assert_eq!(audit.status, "pending");

        let second = worker.process_next().await.unwrap().unwrap();
        assert_eq!(second.disposition, Disposition::Completed);

        let audit = audit_log::get_for_queue_item(&pool, item.id).await.unwrap();
        assert_eq!(audit.status, "completed");
        assert!(audit.error.is_none());
        assert_eq!(fake.state.lock().unwrap().ref_updates.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_exhausted_after_max_attempts() {
        let pool = setup_test_db().await;
        let fake = Arc::new(FakeRemote::new());
        fake.state.lock().unwrap().fail_network = true;
        let worker = test_worker(&pool, fake.clone());

        let item = enqueue_create_repo(&pool, "s1").await;

        let first = worker.process_next().await.unwrap().unwrap();
        assert_eq!(first.disposition, Disposition::Retried);
        let second = worker.process_next().await.unwrap().unwrap();
        assert_eq!(second.disposition, Disposition::Retried);
        let third = worker.process_next().await.unwrap().unwrap();
        assert_eq!(third.disposition, Disposition::Failed);

        // Exactly max_retries attempts reached the remote
        assert_eq!(fake.call_count("create_repository"), 3);
        assert!(worker.process_next().await.unwrap().is_none());

        let reloaded = sync_queue::get_item(&pool, item.id).await.unwrap();
        assert_eq!(reloaded.status, "failed");
        assert_eq!(reloaded.retry_count, reloaded.max_retries);

        let audit = audit_log::get_for_queue_item(&pool, item.id).await.unwrap();
        assert_eq!(audit.status, "failed");
    }

    #[tokio::test]
    async fn test_higher_priority_operations_run_first() {
        let pool = setup_test_db().await;
        bind_session(&pool, "s1").await;
        let fake = Arc::new(FakeRemote::with_branch("main", "head-0", "tree-0"));
        let worker = test_worker(&pool, fake.clone());

        let commit = enqueue_commit(&pool, "s1").await;
        let create = enqueue_create_repo(&pool, "s1").await;

        let first = worker.process_next().await.unwrap().unwrap();
        assert_eq!(first.item_id, create.id);

        let second = worker.process_next().await.unwrap().unwrap();
        assert_eq!(second.item_id, commit.id);
    }

    #[test]
    fn test_backoff_stays_within_bounds() {
        let policy = BackoffPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };

        for retry_count in 0..10 {
            let delay = policy.delay(retry_count);
            assert!(delay <= Duration::from_millis(1_000));
        }
    }

    #[tokio::test]
    async fn test_background_worker_drains_on_trigger() {
        let pool = setup_test_db().await;
        let fake = Arc::new(FakeRemote::new());
        let worker = test_worker(&pool, fake.clone());

        let item = enqueue_create_repo(&pool, "s1").await;

        let handle = worker.start_background();
        handle.trigger_poll().await;

        // Give the background task a moment to settle the item
        for _ in 0..50 {
            let reloaded = sync_queue::get_item(&pool, item.id).await.unwrap();
            if reloaded.status == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let reloaded = sync_queue::get_item(&pool, item.id).await.unwrap();
        assert_eq!(reloaded.status, "completed");
        handle.stop().await;
    }
}

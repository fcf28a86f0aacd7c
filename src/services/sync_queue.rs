//! Operation queue persistence service.
//!
//! Stores pending synchronization operations in SQLite and hands them to
//! workers through an atomic claim protocol. Queue rows are mutated only by
//! the sync worker; the audit log keeps the immutable history.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::queue_item::{OperationPayload, QueueItem};
use crate::services::audit_log;
use std::time::{SystemTime, UNIX_EPOCH};

/// Input for enqueuing a new operation.
///
/// The operation kind is derived from the payload variant, so a payload can
/// never be filed under the wrong kind.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub session_id: String,
    pub user_id: String,
    pub payload: OperationPayload,
    /// Higher priority is claimed sooner.
    pub priority: i64,
    /// Attempt budget; defaults to [`QueueItem::DEFAULT_MAX_RETRIES`].
    pub max_retries: Option<i64>,
}

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Validate an enqueue request before anything is persisted.
fn validate(request: &EnqueueRequest) -> Result<(), SyncError> {
    if request.session_id.trim().is_empty() {
        return Err(SyncError::validation_field(
            "session_id must not be empty",
            "session_id",
        ));
    }
    if request.user_id.trim().is_empty() {
        return Err(SyncError::validation_field(
            "user_id must not be empty",
            "user_id",
        ));
    }

    if let Some(commit) = request.payload.as_commit() {
        if commit.files.is_empty() {
            return Err(SyncError::validation_field(
                "commit requires at least one file change",
                "files",
            ));
        }
        if commit.commit_message.trim().is_empty() {
            return Err(SyncError::validation_field(
                "commit requires a commit message",
                "commit_message",
            ));
        }
        for change in &commit.files {
            if change.path.trim().is_empty() {
                return Err(SyncError::validation_field(
                    "file change requires a path",
                    "files",
                ));
            }
            let needs_content = !matches!(
                change.action,
                crate::models::queue_item::FileAction::Delete
            );
            if needs_content && change.content.is_none() {
                return Err(SyncError::validation_field(
                    format!("file change for {} requires content", change.path),
                    "files",
                ));
            }
        }
    }

    Ok(())
}

/// Add a new operation to the queue.
///
/// Persists the queue item (status `queued`) and its initial audit record
/// (status `pending`) in one transaction.
///
/// Duplicate `create_repo` requests are allowed here on purpose: two racing
/// items converge at execution time inside the repository bootstrapper.
pub async fn enqueue(pool: &DbPool, request: EnqueueRequest) -> Result<QueueItem, SyncError> {
    validate(&request)?;

    let operation = request.payload.kind().to_string();
    let payload_json = serde_json::to_string(&request.payload)?;
    let max_retries = request
        .max_retries
        .unwrap_or(QueueItem::DEFAULT_MAX_RETRIES);
    let created_at = now();

    let mut tx = pool.begin().await?;

    let item = sqlx::query_as::<_, QueueItem>(
        r#"
        INSERT INTO sync_queue (session_id, user_id, operation, status, priority, payload, retry_count, max_retries, created_at)
        VALUES (?, ?, ?, 'queued', ?, ?, 0, ?, ?)
        RETURNING id, session_id, user_id, operation, status, priority, payload, retry_count, max_retries, created_at, processed_at, last_error
        "#,
    )
    .bind(&request.session_id)
    .bind(&request.user_id)
    .bind(&operation)
    .bind(request.priority)
    .bind(&payload_json)
    .bind(max_retries)
    .bind(created_at)
    .fetch_one(&mut *tx)
    .await?;

    audit_log::record_enqueued(&mut *tx, &item, &request.payload).await?;

    tx.commit().await?;

    log::debug!(
        "Enqueued {} operation {} for session {} (priority {})",
        operation,
        item.id,
        item.session_id,
        item.priority
    );

    Ok(item)
}

/// Claim the next eligible queue item for exclusive execution.
///
/// Candidates are `queued` items with retry budget left, ordered by priority
/// descending, then enqueue time ascending. The claim itself is an atomic
/// conditional transition (`queued` → `processing`); when several workers
/// race for one item exactly one observes the transition, and losers move on
/// to the next candidate.
pub async fn claim_next(pool: &DbPool) -> Result<Option<QueueItem>, SyncError> {
    loop {
        let candidates = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT id, session_id, user_id, operation, status, priority, payload, retry_count, max_retries, created_at, processed_at, last_error
            FROM sync_queue
            WHERE status = 'queued' AND retry_count < max_retries
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT 8
            "#,
        )
        .fetch_all(pool)
        .await?;

        if candidates.is_empty() {
            return Ok(None);
        }

        for mut item in candidates {
            if try_claim(pool, item.id).await? {
                item.status = "processing".to_string();
                return Ok(Some(item));
            }
        }
        // Every candidate in this batch went to another worker; re-select.
    }
}

/// Attempt the atomic `queued` → `processing` transition for one item.
///
/// Returns true iff this caller won the claim.
pub async fn try_claim(pool: &DbPool, item_id: i64) -> Result<bool, SyncError> {
    let result =
        sqlx::query("UPDATE sync_queue SET status = 'processing' WHERE id = ? AND status = 'queued'")
            .bind(item_id)
            .execute(pool)
            .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark a claimed item as successfully completed.
pub async fn mark_completed(pool: &DbPool, item_id: i64) -> Result<(), SyncError> {
    sqlx::query(
        "UPDATE sync_queue SET status = 'completed', processed_at = ?, last_error = NULL WHERE id = ?",
    )
    .bind(now())
    .bind(item_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Return a claimed item to the pool after a retryable failure.
///
/// Increments the retry count; the caller has already checked the budget.
pub async fn requeue_for_retry(pool: &DbPool, item_id: i64, error: &str) -> Result<(), SyncError> {
    sqlx::query(
        "UPDATE sync_queue SET status = 'queued', retry_count = retry_count + 1, last_error = ? WHERE id = ?",
    )
    .bind(error)
    .bind(item_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a claimed item as terminally failed.
pub async fn mark_failed(pool: &DbPool, item_id: i64, error: &str) -> Result<(), SyncError> {
    sqlx::query(
        "UPDATE sync_queue SET status = 'failed', retry_count = retry_count + 1, processed_at = ?, last_error = ? WHERE id = ?",
    )
    .bind(now())
    .bind(error)
    .bind(item_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a single queue item by ID.
pub async fn get_item(pool: &DbPool, item_id: i64) -> Result<QueueItem, SyncError> {
    let item = sqlx::query_as::<_, QueueItem>(
        r#"
        SELECT id, session_id, user_id, operation, status, priority, payload, retry_count, max_retries, created_at, processed_at, last_error
        FROM sync_queue
        WHERE id = ?
        "#,
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    item.ok_or_else(|| SyncError::not_found_with_id("QueueItem", item_id.to_string()))
}

/// List all queue items for a session, oldest first.
pub async fn list_for_session(
    pool: &DbPool,
    session_id: &str,
) -> Result<Vec<QueueItem>, SyncError> {
    let items = sqlx::query_as::<_, QueueItem>(
        r#"
        SELECT id, session_id, user_id, operation, status, priority, payload, retry_count, max_retries, created_at, processed_at, last_error
        FROM sync_queue
        WHERE session_id = ?
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

/// Counts of queue items by broad state, for status displays.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueCounts {
    /// Items queued or currently processing.
    pub pending: i64,
    /// Items terminally failed.
    pub failed: i64,
}

/// Get counts of pending and failed queue items.
pub async fn queue_counts(pool: &DbPool) -> Result<QueueCounts, SyncError> {
    let row: (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(CASE WHEN status = 'queued' OR status = 'processing' THEN 1 END),
            COUNT(CASE WHEN status = 'failed' THEN 1 END)
        FROM sync_queue
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(QueueCounts {
        pending: row.0,
        failed: row.1,
    })
}

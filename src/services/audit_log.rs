//! Audit log persistence service.
//!
//! Keeps the immutable outcome history, independent of the queue: queue rows
//! are mutated and retried, audit records are written once per queue item
//! and frozen as soon as they reach a terminal state.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::audit_record::AuditRecord;
use crate::models::queue_item::{OperationPayload, QueueItem};
use sqlx::Sqlite;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Insert the initial `pending` record for a freshly enqueued item.
///
/// Takes a generic executor so the enqueue path can write the queue row and
/// the audit row in one transaction.
pub async fn record_enqueued<'e, E>(
    executor: E,
    item: &QueueItem,
    payload: &OperationPayload,
) -> Result<(), SyncError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let (commit_message, file_count) = match payload.as_commit() {
        Some(commit) => (
            Some(commit.commit_message.clone()),
            Some(commit.files.len() as i64),
        ),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO audit_log (queue_id, session_id, user_id, operation, status, commit_message, file_count, created_at)
        VALUES (?, ?, ?, ?, 'pending', ?, ?, ?)
        "#,
    )
    .bind(item.id)
    .bind(&item.session_id)
    .bind(&item.user_id)
    .bind(&item.operation)
    .bind(commit_message)
    .bind(file_count)
    .bind(item.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Record an intermediate attempt failure without leaving `pending`.
///
/// Retries update the error on the same record; the status only changes when
/// the operation reaches a terminal state.
pub async fn record_attempt_error(
    pool: &DbPool,
    queue_id: i64,
    error: &str,
) -> Result<(), SyncError> {
    sqlx::query("UPDATE audit_log SET error = ? WHERE queue_id = ? AND status = 'pending'")
        .bind(error)
        .bind(queue_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Mark the record completed. Terminal records are never touched again, so
/// the update is guarded on the record still being pending.
pub async fn mark_completed(pool: &DbPool, queue_id: i64) -> Result<(), SyncError> {
    sqlx::query(
        r#"
        UPDATE audit_log
        SET status = 'completed', error = NULL, completed_at = ?
        WHERE queue_id = ? AND status = 'pending'
        "#,
    )
    .bind(now())
    .bind(queue_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark the record failed with the terminal error message.
pub async fn mark_failed(pool: &DbPool, queue_id: i64, error: &str) -> Result<(), SyncError> {
    sqlx::query(
        r#"
        UPDATE audit_log
        SET status = 'failed', error = ?, completed_at = ?
        WHERE queue_id = ? AND status = 'pending'
        "#,
    )
    .bind(error)
    .bind(now())
    .bind(queue_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the audit record for one queue item.
pub async fn get_for_queue_item(pool: &DbPool, queue_id: i64) -> Result<AuditRecord, SyncError> {
    let record = sqlx::query_as::<_, AuditRecord>(
        r#"
        SELECT id, queue_id, session_id, user_id, operation, status, commit_message, file_count, error, created_at, completed_at
        FROM audit_log
        WHERE queue_id = ?
        "#,
    )
    .bind(queue_id)
    .fetch_optional(pool)
    .await?;

    record.ok_or_else(|| SyncError::not_found_with_id("AuditRecord", queue_id.to_string()))
}

/// List a session's operation history, newest first.
pub async fn list_history(
    pool: &DbPool,
    session_id: &str,
    limit: i64,
) -> Result<Vec<AuditRecord>, SyncError> {
    let records = sqlx::query_as::<_, AuditRecord>(
        r#"
        SELECT id, queue_id, session_id, user_id, operation, status, commit_message, file_count, error, created_at, completed_at
        FROM audit_log
        WHERE session_id = ?
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(session_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

//! Repository binding persistence service.
//!
//! One binding per collaboration session, written once. Insertion uses an
//! insert-if-absent so racing bootstrappers converge on whichever binding
//! landed first.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::repository_binding::RepositoryBinding;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Get the binding for a session, if one exists.
pub async fn get_binding(
    pool: &DbPool,
    session_id: &str,
) -> Result<Option<RepositoryBinding>, SyncError> {
    let binding = sqlx::query_as::<_, RepositoryBinding>(
        r#"
        SELECT session_id, remote_repo_id, repo_name, repo_owner, repo_url, is_private, last_synced_at
        FROM repository_bindings
        WHERE session_id = ?
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(binding)
}

/// Persist a binding unless the session is already bound.
///
/// Returns the stored binding, which is the existing one when another
/// bootstrap attempt won the race. `remote_repo_id` is never overwritten.
pub async fn insert_if_absent(
    pool: &DbPool,
    binding: &RepositoryBinding,
) -> Result<RepositoryBinding, SyncError> {
    sqlx::query(
        r#"
        INSERT INTO repository_bindings (session_id, remote_repo_id, repo_name, repo_owner, repo_url, is_private, last_synced_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id) DO NOTHING
        "#,
    )
    .bind(&binding.session_id)
    .bind(binding.remote_repo_id)
    .bind(&binding.repo_name)
    .bind(&binding.repo_owner)
    .bind(&binding.repo_url)
    .bind(binding.is_private)
    .bind(binding.last_synced_at)
    .execute(pool)
    .await?;

    get_binding(pool, &binding.session_id)
        .await?
        .ok_or_else(|| SyncError::internal("Binding vanished after insert"))
}

/// Advance `last_synced_at` after a successful commit.
pub async fn touch_last_synced(pool: &DbPool, session_id: &str) -> Result<(), SyncError> {
    sqlx::query("UPDATE repository_bindings SET last_synced_at = ? WHERE session_id = ?")
        .bind(now())
        .bind(session_id)
        .execute(pool)
        .await?;

    Ok(())
}

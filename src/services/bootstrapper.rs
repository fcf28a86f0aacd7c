//! Repository bootstrapper.
//!
//! Ensures a session has a remote repository and a stored binding before any
//! commit runs. Bootstrapping is idempotent: once a binding exists, calling
//! it again performs no remote work.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::repository_binding::RepositoryBinding;
use crate::services::binding_store;
use crate::services::github_client::{CreateRepositoryRequest, GitHubRepository, RemoteObjects};
use log::{info, warn};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Derive the remote repository name for a session.
pub fn repo_name_for_session(session_id: &str) -> String {
    format!("codecollab-{}", session_id)
}

fn binding_from_repo(session_id: &str, repo: &GitHubRepository) -> RepositoryBinding {
    RepositoryBinding {
        session_id: session_id.to_string(),
        remote_repo_id: repo.id,
        repo_name: repo.name.clone(),
        repo_owner: repo.owner.login.clone(),
        repo_url: repo.html_url.clone(),
        is_private: repo.private,
        last_synced_at: now(),
    }
}

/// Ensure the session has a bound remote repository, creating one if needed.
///
/// A "name already exists" rejection from the remote is treated as a
/// recoverable race: some other worker created the repository first, so the
/// existing one is looked up and bound instead of surfacing the failure.
pub async fn ensure_repository(
    pool: &DbPool,
    api: &dyn RemoteObjects,
    session_id: &str,
) -> Result<RepositoryBinding, SyncError> {
    if session_id.is_empty() {
        return Err(SyncError::validation_field(
            "Session id must not be empty",
            "session_id",
        ));
    }

    if let Some(existing) = binding_store::get_binding(pool, session_id).await? {
        return Ok(existing);
    }

    let name = repo_name_for_session(session_id);
    let request = CreateRepositoryRequest {
        name: name.clone(),
        description: format!("CodeCollab session: {}", session_id),
        private: true,
        auto_init: true,
    };

    let repo = match api.create_repository(&request).await {
        Ok(repo) => {
            info!("Created repository {} for session {}", repo.name, session_id);
            repo
        }
        Err(e) if e.is_conflict() => {
            // Lost the creation race; bind to the repository that won
            warn!(
                "Repository {} already exists, binding to the existing one",
                name
            );
            let user = api.get_authenticated_user().await?;
            api.get_repository(&user.login, &name).await?
        }
        Err(e) => return Err(e),
    };

    binding_store::insert_if_absent(pool, &binding_from_repo(session_id, &repo)).await
}

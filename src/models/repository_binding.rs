//! Repository binding model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Mapping of a collaboration session to its remote GitHub repository.
///
/// At most one binding exists per session. `remote_repo_id` is written once
/// by the bootstrapper; afterwards only `last_synced_at` changes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RepositoryBinding {
    /// Collaboration session ID.
    pub session_id: String,

    /// GitHub repository ID.
    pub remote_repo_id: i64,

    /// Repository name (e.g. `codecollab-abc123`).
    pub repo_name: String,

    /// Login of the repository owner.
    pub repo_owner: String,

    /// Browsable repository URL.
    pub repo_url: String,

    /// Whether the repository is private.
    pub is_private: bool,

    /// Last successful sync (Unix seconds).
    pub last_synced_at: i64,
}

impl RepositoryBinding {
    /// Browsable URL for a commit in this repository.
    pub fn commit_url(&self, sha: &str) -> String {
        format!("{}/commit/{}", self.repo_url.trim_end_matches('/'), sha)
    }
}

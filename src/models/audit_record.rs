//! Audit record model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Pending,
    Completed,
    Failed,
}

impl From<&str> for AuditStatus {
    fn from(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Immutable history entry for one queue item's lifecycle.
///
/// One record per queue item, not per attempt: intermediate retries update
/// the record's `error` in place, and the terminal status is written once.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditRecord {
    /// Audit record ID.
    pub id: i64,

    /// Queue item this record mirrors.
    pub queue_id: i64,

    /// Session the operation belongs to.
    pub session_id: String,

    /// User who requested the operation.
    pub user_id: String,

    /// Operation kind: `create_repo`, `commit`, `sync`.
    pub operation: String,

    /// Status: `pending`, `completed`, `failed`.
    pub status: String,

    /// Commit message, for commit/sync operations (display).
    pub commit_message: Option<String>,

    /// Number of files in the operation payload (display).
    pub file_count: Option<i64>,

    /// Terminal error message, if the operation failed.
    pub error: Option<String>,

    /// When the operation was enqueued (Unix seconds).
    pub created_at: i64,

    /// When the operation reached a terminal state (Unix seconds, optional).
    pub completed_at: Option<i64>,
}

impl AuditRecord {
    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> AuditStatus {
        AuditStatus::from(self.status.as_str())
    }

    /// Whether the record has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status_enum(),
            AuditStatus::Completed | AuditStatus::Failed
        )
    }
}

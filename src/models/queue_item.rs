//! Queue item model and typed operation payloads.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of synchronization operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateRepo,
    Commit,
    Sync,
}

impl OperationKind {
    /// Parse a stored operation string, rejecting unknown kinds.
    pub fn parse(s: &str) -> Result<Self, SyncError> {
        match s {
            "create_repo" => Ok(Self::CreateRepo),
            "commit" => Ok(Self::Commit),
            "sync" => Ok(Self::Sync),
            other => Err(SyncError::validation_field(
                format!("Unknown operation kind: {}", other),
                "operation",
            )),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateRepo => write!(f, "create_repo"),
            Self::Commit => write!(f, "commit"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl From<&str> for QueueStatus {
    fn from(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Action to take on a single file within a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Update,
    Delete,
}

/// One file change in a commit payload. `content` is absent for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub action: FileAction,
}

/// Payload for `commit` and `sync` operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPayload {
    pub files: Vec<FileChange>,
    pub commit_message: String,
    /// Target branch. When absent the pipeline tries `main`, then `master`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Typed, tagged payload for a queue item, one variant per operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    CreateRepo,
    Commit(CommitPayload),
    Sync(CommitPayload),
}

impl OperationPayload {
    /// The operation kind this payload belongs to.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateRepo => OperationKind::CreateRepo,
            Self::Commit(_) => OperationKind::Commit,
            Self::Sync(_) => OperationKind::Sync,
        }
    }

    /// The commit payload, for `commit`/`sync` operations.
    pub fn as_commit(&self) -> Option<&CommitPayload> {
        match self {
            Self::Commit(p) | Self::Sync(p) => Some(p),
            Self::CreateRepo => None,
        }
    }
}

/// A pending or in-flight unit of synchronization work.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueItem {
    /// Queue item ID.
    pub id: i64,

    /// Collaboration session this operation belongs to.
    pub session_id: String,

    /// User on whose behalf the operation runs (owns the access token).
    pub user_id: String,

    /// Operation kind: `create_repo`, `commit`, `sync`.
    pub operation: String,

    /// Status: `queued`, `processing`, `completed`, `failed`.
    pub status: String,

    /// Higher priority is claimed sooner.
    pub priority: i64,

    /// JSON-encoded [`OperationPayload`].
    pub payload: String,

    /// Number of attempts so far.
    pub retry_count: i64,

    /// Attempt budget; once exhausted the item is terminally failed.
    pub max_retries: i64,

    /// When the item was enqueued (Unix seconds).
    pub created_at: i64,

    /// When the item reached a terminal state (Unix seconds, optional).
    pub processed_at: Option<i64>,

    /// Most recent error message (optional).
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Default attempt budget for new items.
    pub const DEFAULT_MAX_RETRIES: i64 = 3;

    /// Parse the operation string into an enum.
    pub fn kind(&self) -> Result<OperationKind, SyncError> {
        OperationKind::parse(&self.operation)
    }

    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> QueueStatus {
        QueueStatus::from(self.status.as_str())
    }

    /// Decode the typed payload.
    pub fn decode_payload(&self) -> Result<OperationPayload, SyncError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| SyncError::internal(format!("Corrupt queue payload: {}", e)))
    }
}

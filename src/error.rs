//! Error taxonomy for the sync subsystem.
//!
//! Every failure that reaches the sync worker is classified into one of
//! these variants; `is_retryable` is the single source of truth for the
//! retry-vs-terminal decision. Errors are serializable so the embedding
//! application can surface them as structured JSON.

use serde::Serialize;
use thiserror::Error;

/// Classified errors produced by the queue, pipeline, and remote client.
///
/// All variants serialize to a structured JSON object for host consumption.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum SyncError {
    /// Malformed enqueue request or operation payload. Rejected at the
    /// enqueue boundary, never retried.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Missing, invalid, or expired access token. Retrying cannot succeed
    /// without new credentials.
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Session, binding, or branch absent.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Non-fast-forward ref update or remote "already exists". Retryable;
    /// the next attempt re-resolves the branch head.
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Remote rate limit hit (403 with exhausted quota, or 429).
    #[error("Rate limited: {message}")]
    RateLimit { message: String },

    /// Timeout or connection failure before a response was received.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Remote API returned an unclassified error status.
    #[error("GitHub API error ({status_code}): {message}")]
    Api {
        message: String,
        status_code: u16,
        endpoint: String,
    },

    /// Local database operation failed.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Internal invariant violation or serialization failure.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field.
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with an identifier.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            endpoint: None,
        }
    }

    /// Create a conflict error with the endpoint that rejected the request.
    pub fn conflict_at(message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a rate limit error.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an API error with status code and endpoint.
    pub fn api(message: impl Into<String>, status_code: u16, endpoint: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            status_code,
            endpoint: endpoint.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a failed operation should be requeued for another attempt.
    ///
    /// Conflicts are retryable because the next attempt resolves the branch
    /// head fresh (repo-name conflicts are recovered inside the bootstrapper
    /// and normally never reach this check). Server-side 5xx responses are
    /// treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::RateLimit { .. } | Self::Network { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Whether this is the remote telling us a resource already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether this is an absent-resource error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// Conversions from common error types

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for SyncError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}

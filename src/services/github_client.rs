//! GitHub API client.
//!
//! Thin, stateless wrapper over the GitHub REST endpoints the sync subsystem
//! consumes: repository creation and the Git Data API (blobs, trees, commits,
//! refs). The client only shapes requests, injects the caller's token, and
//! maps HTTP statuses onto the error taxonomy; retry decisions live in the
//! sync worker.
//!
//! Clients are request-scoped: each session/user carries its own credential,
//! so a new client is constructed per operation from that user's token.

use crate::error::SyncError;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    /// Base URL of the API (normally `https://api.github.com`).
    pub api_base: String,

    /// OAuth/PAT access token for the acting user.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Authenticated user from `GET /user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub id: i64,
    pub login: String,
}

/// Repository from `POST /user/repos` or `GET /repos/{owner}/{repo}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepository {
    pub id: i64,
    pub name: String,
    pub owner: GitHubUser,
    pub html_url: String,
    pub private: bool,
}

/// Parameters for creating a repository.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRepositoryRequest {
    pub name: String,
    pub description: String,
    pub private: bool,
    /// Seed the repository with an initial commit so a branch head exists.
    pub auto_init: bool,
}

/// Resolved branch head: the tip commit and the tree it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchHead {
    pub commit_sha: String,
    pub tree_sha: String,
}

/// One entry in a tree creation request. A `sha` of `None` serializes to
/// JSON `null`, which tells the remote to delete the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub sha: Option<String>,
}

impl TreeEntry {
    /// Entry pointing a path at a blob (create/update).
    pub fn blob(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644".to_string(),
            entry_type: "blob".to_string(),
            sha: Some(sha.into()),
        }
    }

    /// Entry removing a path from the tree.
    pub fn deletion(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644".to_string(),
            entry_type: "blob".to_string(),
            sha: None,
        }
    }
}

/// The remote Git object operations the pipeline and bootstrapper depend on.
///
/// Implemented by [`GitHubClient`] for production and by in-memory fakes in
/// tests, keeping everything above the HTTP layer testable without a network.
#[async_trait]
pub trait RemoteObjects: Send + Sync {
    /// `GET /user`
    async fn get_authenticated_user(&self) -> Result<GitHubUser, SyncError>;

    /// `POST /user/repos`
    async fn create_repository(
        &self,
        request: &CreateRepositoryRequest,
    ) -> Result<GitHubRepository, SyncError>;

    /// `GET /repos/{owner}/{repo}`
    async fn get_repository(&self, owner: &str, repo: &str)
        -> Result<GitHubRepository, SyncError>;

    /// `GET /repos/{owner}/{repo}/branches/{branch}`
    async fn get_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchHead, SyncError>;

    /// `POST /repos/{owner}/{repo}/git/blobs`, returns the blob SHA.
    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &str,
    ) -> Result<String, SyncError>;

    /// `POST /repos/{owner}/{repo}/git/trees`, returns the tree SHA.
    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, SyncError>;

    /// `POST /repos/{owner}/{repo}/git/commits`, returns the commit SHA.
    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<String, SyncError>;

    /// `PATCH /repos/{owner}/{repo}/git/refs/heads/{branch}` with
    /// `force: false`; a rejected update surfaces as a conflict.
    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), SyncError>;
}

/// GitHub REST client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
}

/// Response shape shared by blob, tree, and commit creation.
#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
    commit: BranchCommitDetail,
}

#[derive(Debug, Deserialize)]
struct BranchCommitDetail {
    tree: TreeRef,
}

#[derive(Debug, Deserialize)]
struct TreeRef {
    sha: String,
}

impl GitHubClient {
    /// Create a new client authorized with the config's token.
    pub fn new(config: GitHubClientConfig) -> Result<Self, SyncError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| SyncError::auth("Invalid token format"))?;
        headers.insert(header::AUTHORIZATION, token_value);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .user_agent("codecollab-sync")
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build the full URL for an endpoint path.
    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Map response statuses to the error taxonomy, parsing success bodies.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, SyncError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| SyncError::internal(format!("Failed to parse response: {}", e)));
        }

        let rate_limit_exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "0")
            .unwrap_or(false);

        let body = response.text().await.unwrap_or_default();
        // GitHub error bodies look like {"message": "...", "errors": [...]}
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message")?.as_str().map(String::from))
            .unwrap_or_else(|| format!("Request failed ({})", status.as_u16()));

        match status {
            StatusCode::UNAUTHORIZED => Err(SyncError::auth(
                "GitHub token missing, expired, or revoked",
            )),
            StatusCode::FORBIDDEN if rate_limit_exhausted => Err(SyncError::rate_limit(body_message)),
            StatusCode::FORBIDDEN => Err(SyncError::auth(body_message)),
            StatusCode::TOO_MANY_REQUESTS => Err(SyncError::rate_limit(body_message)),
            StatusCode::NOT_FOUND => Err(SyncError::not_found_with_id(body_message, endpoint)),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(SyncError::conflict_at(body_message, endpoint))
            }
            _ => Err(SyncError::api(body_message, status.as_u16(), endpoint)),
        }
    }

    /// POST a JSON body and parse the JSON response.
    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
    ) -> Result<T, SyncError> {
        let url = self.api_url(endpoint);
        let response = self.client.post(&url).json(body).send().await?;
        self.handle_response(response, endpoint).await
    }
}

#[async_trait]
impl RemoteObjects for GitHubClient {
    async fn get_authenticated_user(&self) -> Result<GitHubUser, SyncError> {
        let endpoint = "/user";
        let response = self.client.get(self.api_url(endpoint)).send().await?;
        self.handle_response(response, endpoint).await
    }

    async fn create_repository(
        &self,
        request: &CreateRepositoryRequest,
    ) -> Result<GitHubRepository, SyncError> {
        self.post_json("/user/repos", request).await
    }

    async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<GitHubRepository, SyncError> {
        let endpoint = format!("/repos/{}/{}", owner, repo);
        let response = self.client.get(self.api_url(&endpoint)).send().await?;
        self.handle_response(response, &endpoint).await
    }

    async fn get_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchHead, SyncError> {
        let endpoint = format!("/repos/{}/{}/branches/{}", owner, repo, branch);
        let response = self.client.get(self.api_url(&endpoint)).send().await?;
        let parsed: BranchResponse = self.handle_response(response, &endpoint).await?;

        Ok(BranchHead {
            commit_sha: parsed.commit.sha,
            tree_sha: parsed.commit.commit.tree.sha,
        })
    }

    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &str,
    ) -> Result<String, SyncError> {
        let endpoint = format!("/repos/{}/{}/git/blobs", owner, repo);
        let body = serde_json::json!({ "content": content, "encoding": "utf-8" });
        let parsed: ShaResponse = self.post_json(&endpoint, &body).await?;
        Ok(parsed.sha)
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, SyncError> {
        let endpoint = format!("/repos/{}/{}/git/trees", owner, repo);
        let body = serde_json::json!({ "base_tree": base_tree, "tree": entries });
        let parsed: ShaResponse = self.post_json(&endpoint, &body).await?;
        Ok(parsed.sha)
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<String, SyncError> {
        let endpoint = format!("/repos/{}/{}/git/commits", owner, repo);
        let body = serde_json::json!({ "message": message, "tree": tree, "parents": parents });
        let parsed: ShaResponse = self.post_json(&endpoint, &body).await?;
        Ok(parsed.sha)
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), SyncError> {
        let endpoint = format!("/repos/{}/{}/git/refs/heads/{}", owner, repo, branch);
        let url = self.api_url(&endpoint);
        let body = serde_json::json!({ "sha": sha, "force": false });

        let response = self.client.patch(&url).json(&body).send().await?;
        // The ref endpoint returns the updated ref object; we only need success
        let _: serde_json::Value = self.handle_response(response, &endpoint).await?;
        Ok(())
    }
}

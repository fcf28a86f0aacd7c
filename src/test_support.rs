//! In-memory fakes shared by unit tests.

use crate::error::SyncError;
use crate::services::github_client::{
    BranchHead, CreateRepositoryRequest, GitHubRepository, GitHubUser, RemoteObjects, TreeEntry,
};
use crate::services::sync_worker::AccessTokenSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Scripted state behind a [`FakeRemote`].
#[derive(Debug, Default)]
pub struct FakeState {
    /// Method names, in call order.
    pub calls: Vec<String>,
    /// Repositories that exist on the fake remote, by name.
    pub repos: HashMap<String, GitHubRepository>,
    /// Branch heads by branch name.
    pub branches: HashMap<String, BranchHead>,
    /// Recorded tree creation requests: (base_tree, entries).
    pub tree_requests: Vec<(String, Vec<TreeEntry>)>,
    /// Recorded commit creations: (message, tree, parents).
    pub commit_requests: Vec<(String, String, Vec<String>)>,
    /// Recorded ref updates: (branch, sha).
    pub ref_updates: Vec<(String, String)>,
    /// Number of upcoming ref updates to reject as non-fast-forward.
    pub ref_conflicts_remaining: u32,
    /// When set, every remote call fails with a transient network error.
    pub fail_network: bool,
    next_id: i64,
}

/// Fake implementation of [`RemoteObjects`] backed by in-memory state.
#[derive(Debug, Default)]
pub struct FakeRemote {
    pub state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake with a single branch whose head is known.
    pub fn with_branch(branch: &str, commit_sha: &str, tree_sha: &str) -> Self {
        let fake = Self::new();
        fake.state.lock().unwrap().branches.insert(
            branch.to_string(),
            BranchHead {
                commit_sha: commit_sha.to_string(),
                tree_sha: tree_sha.to_string(),
            },
        );
        fake
    }

    /// Pre-create a repository on the fake remote.
    pub fn add_repo(&self, name: &str, id: i64) {
        let mut state = self.state.lock().unwrap();
        state.repos.insert(
            name.to_string(),
            GitHubRepository {
                id,
                name: name.to_string(),
                owner: GitHubUser {
                    id: 1,
                    login: "octocat".to_string(),
                },
                html_url: format!("https://github.com/octocat/{}", name),
                private: true,
            },
        );
    }

    /// Number of calls made to the named method.
    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == method)
            .count()
    }

    fn record(&self, method: &str) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method.to_string());
        if state.fail_network {
            return Err(SyncError::network("connection reset by fake"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteObjects for FakeRemote {
    async fn get_authenticated_user(&self) -> Result<GitHubUser, SyncError> {
        self.record("get_authenticated_user")?;
        Ok(GitHubUser {
            id: 1,
            login: "octocat".to_string(),
        })
    }

    async fn create_repository(
        &self,
        request: &CreateRepositoryRequest,
    ) -> Result<GitHubRepository, SyncError> {
        self.record("create_repository")?;
        let mut state = self.state.lock().unwrap();

        if state.repos.contains_key(&request.name) {
            return Err(SyncError::conflict_at(
                "name already exists on this account",
                "/user/repos",
            ));
        }

        state.next_id += 1;
        let repo = GitHubRepository {
            id: 1000 + state.next_id,
            name: request.name.clone(),
            owner: GitHubUser {
                id: 1,
                login: "octocat".to_string(),
            },
            html_url: format!("https://github.com/octocat/{}", request.name),
            private: request.private,
        };
        state.repos.insert(request.name.clone(), repo.clone());
        Ok(repo)
    }

    async fn get_repository(
        &self,
        _owner: &str,
        repo: &str,
    ) -> Result<GitHubRepository, SyncError> {
        self.record("get_repository")?;
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(repo)
            .cloned()
            .ok_or_else(|| SyncError::not_found_with_id("Repository", repo))
    }

    async fn get_branch(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
    ) -> Result<BranchHead, SyncError> {
        self.record("get_branch")?;
        let state = self.state.lock().unwrap();
        state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| SyncError::not_found_with_id("Branch", branch))
    }

    async fn create_blob(
        &self,
        _owner: &str,
        _repo: &str,
        _content: &str,
    ) -> Result<String, SyncError> {
        self.record("create_blob")?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        Ok(format!("blob-{}", state.next_id))
    }

    async fn create_tree(
        &self,
        _owner: &str,
        _repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, SyncError> {
        self.record("create_tree")?;
        let mut state = self.state.lock().unwrap();
        state
            .tree_requests
            .push((base_tree.to_string(), entries.to_vec()));
        state.next_id += 1;
        Ok(format!("tree-{}", state.next_id))
    }

    async fn create_commit(
        &self,
        _owner: &str,
        _repo: &str,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<String, SyncError> {
        self.record("create_commit")?;
        let mut state = self.state.lock().unwrap();
        state.commit_requests.push((
            message.to_string(),
            tree.to_string(),
            parents.to_vec(),
        ));
        state.next_id += 1;
        Ok(format!("commit-{}", state.next_id))
    }

    async fn update_ref(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), SyncError> {
        self.record("update_ref")?;
        let mut state = self.state.lock().unwrap();

        if state.ref_conflicts_remaining > 0 {
            state.ref_conflicts_remaining -= 1;
            return Err(SyncError::conflict_at(
                "Update is not a fast forward",
                "/git/refs",
            ));
        }

        state
            .ref_updates
            .push((branch.to_string(), sha.to_string()));
        // Advance the branch head so a retried commit sees the new tip
        state.branches.insert(
            branch.to_string(),
            BranchHead {
                commit_sha: sha.to_string(),
                tree_sha: format!("tree-of-{}", sha),
            },
        );
        Ok(())
    }
}

/// Token source that hands every user the same static test token.
#[derive(Debug, Default)]
pub struct FakeTokens;

#[async_trait]
impl AccessTokenSource for FakeTokens {
    async fn access_token(&self, _user_id: &str) -> Result<String, SyncError> {
        Ok("test-token".to_string())
    }
}

//! Commit pipeline.
//!
//! Turns a batch of file changes into one remote commit via the Git Data
//! API: resolve the branch head, upload blobs, build a tree on top of the
//! head's tree, create the commit, then advance the branch ref without
//! force. Either the ref moves to the new commit or nothing observable
//! changes on the remote; a rejected ref update leaves only unreferenced
//! objects behind, which the remote garbage collects.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::queue_item::{CommitPayload, FileAction};
use crate::models::repository_binding::RepositoryBinding;
use crate::services::binding_store;
use crate::services::github_client::{BranchHead, RemoteObjects, TreeEntry};
use futures::future::try_join_all;
use log::{debug, info};
use std::collections::HashMap;

/// Branches tried, in order, when the payload does not name one.
pub const DEFAULT_BRANCH_CANDIDATES: [&str; 2] = ["main", "master"];

/// Outcome of a pushed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// SHA of the commit the branch now points at.
    pub sha: String,
    /// Browser URL of the commit.
    pub url: String,
    /// Branch the commit landed on.
    pub branch: String,
}

/// Resolve the first candidate branch that exists on the remote.
async fn resolve_head(
    api: &dyn RemoteObjects,
    binding: &RepositoryBinding,
    candidates: &[&str],
) -> Result<(String, BranchHead), SyncError> {
    for candidate in candidates {
        match api
            .get_branch(&binding.repo_owner, &binding.repo_name, candidate)
            .await
        {
            Ok(head) => return Ok((candidate.to_string(), head)),
            Err(e) if e.is_not_found() => {
                debug!(
                    "Branch {} not found in {}, trying next candidate",
                    candidate, binding.repo_name
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(SyncError::not_found_with_id(
        "Branch",
        candidates.join(", "),
    ))
}

/// Push one commit containing the payload's file changes.
///
/// Blobs for created and updated files are uploaded concurrently; the tree
/// is built against the head commit's tree so untouched paths survive, with
/// deletions expressed as null-SHA entries.
pub async fn commit(
    pool: &DbPool,
    api: &dyn RemoteObjects,
    binding: &RepositoryBinding,
    payload: &CommitPayload,
) -> Result<CommitResult, SyncError> {
    if payload.files.is_empty() {
        return Err(SyncError::validation_field(
            "Commit payload has no file changes",
            "files",
        ));
    }

    let candidates: Vec<&str> = match payload.branch.as_deref() {
        Some(branch) => vec![branch],
        None => DEFAULT_BRANCH_CANDIDATES.to_vec(),
    };
    let (branch, head) = resolve_head(api, binding, &candidates).await?;

    let owner = binding.repo_owner.as_str();
    let repo = binding.repo_name.as_str();

    let blob_uploads = payload
        .files
        .iter()
        .filter(|file| !matches!(file.action, FileAction::Delete))
        .map(|file| async move {
            let content = file.content.as_deref().ok_or_else(|| {
                SyncError::validation_field("File change is missing content", "content")
            })?;
            let sha = api.create_blob(owner, repo, content).await?;
            Ok::<(String, String), SyncError>((file.path.clone(), sha))
        });
    let blob_shas: HashMap<String, String> =
        try_join_all(blob_uploads).await?.into_iter().collect();

    let entries = payload
        .files
        .iter()
        .map(|file| match file.action {
            FileAction::Delete => Ok(TreeEntry::deletion(file.path.clone())),
            FileAction::Create | FileAction::Update => blob_shas
                .get(&file.path)
                .map(|sha| TreeEntry::blob(file.path.clone(), sha.clone()))
                .ok_or_else(|| SyncError::internal(format!("No blob for {}", file.path))),
        })
        .collect::<Result<Vec<_>, SyncError>>()?;

    let tree_sha = api
        .create_tree(owner, repo, &head.tree_sha, &entries)
        .await?;

    let commit_sha = api
        .create_commit(
            owner,
            repo,
            &payload.commit_message,
            &tree_sha,
            std::slice::from_ref(&head.commit_sha),
        )
        .await?;

    // Non-force update: rejected when the head moved since it was resolved
    api.update_ref(owner, repo, &branch, &commit_sha).await?;

    binding_store::touch_last_synced(pool, &binding.session_id).await?;

    info!(
        "Committed {} file change(s) to {}/{}@{} as {}",
        payload.files.len(),
        owner,
        repo,
        branch,
        commit_sha
    );

    Ok(CommitResult {
        url: binding.commit_url(&commit_sha),
        sha: commit_sha,
        branch,
    })
}

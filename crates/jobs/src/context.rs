//! Builds the immutable review context for a job by fetching the changed
//! file set from GitHub.

use anyhow::{Context, Result, bail};
use patchpilot_core::models::{
    FilePatch, PullRequestReviewContext, PushReviewContext, ReviewContext,
};
use patchpilot_github::GitHubClient;
use serde_json::Value;

use crate::payload::{JobPayload, PullRequestPayload, PushPayload, ReviewJob};

/// Normalize raw file entries from the compare or PR-files endpoints.
/// GitHub returns `filename` on most endpoints but `path` on a few; entries
/// carrying neither are dropped, not fatal.
pub fn serialize_files(files: &[Value]) -> Vec<FilePatch> {
    let mut serialized = Vec::with_capacity(files.len());
    for file in files {
        let path = file
            .get("filename")
            .or_else(|| file.get("path"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let Some(path) = path else {
            tracing::warn!("Skipping file entry missing filename/path: {file}");
            continue;
        };
        serialized.push(FilePatch {
            path: path.to_string(),
            status: file.get("status").and_then(Value::as_str).unwrap_or_default().to_string(),
            additions: file.get("additions").and_then(Value::as_u64).unwrap_or(0),
            deletions: file.get("deletions").and_then(Value::as_u64).unwrap_or(0),
            patch: file.get("patch").and_then(Value::as_str).map(str::to_string),
        });
    }
    serialized
}

pub async fn build_review_context(
    client: &GitHubClient,
    job: &ReviewJob,
) -> Result<ReviewContext> {
    match &job.payload {
        JobPayload::Push(payload) => build_push_context(client, payload).await,
        JobPayload::PullRequest(payload) => build_pull_request_context(client, payload).await,
    }
}

async fn build_push_context(client: &GitHubClient, payload: &PushPayload) -> Result<ReviewContext> {
    let Some(after) = payload.after.as_deref().filter(|s| !s.is_empty()) else {
        bail!("Push payload missing 'after' commit sha");
    };
    // First push to a ref has no prior commit; compare the head to itself
    // rather than to a nonexistent base.
    let base = payload.before.as_deref().filter(|s| !s.is_empty()).unwrap_or(after);

    let compare = client
        .get_commit_compare(payload.installation_id, &payload.repository.full_name, base, after)
        .await
        .context("Failed to fetch commit compare")?;
    let files = compare
        .get("files")
        .and_then(Value::as_array)
        .map(|files| serialize_files(files))
        .unwrap_or_default();
    let compare_url = compare
        .get("html_url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| payload.compare.clone());

    Ok(ReviewContext::Push(PushReviewContext {
        repository: payload.repository.full_name.clone(),
        installation_id: payload.installation_id,
        git_ref: payload.git_ref.clone(),
        before: payload.before.clone(),
        after: payload.after.clone(),
        commits: payload.commits.clone(),
        files,
        compare_url,
    }))
}

async fn build_pull_request_context(
    client: &GitHubClient,
    payload: &PullRequestPayload,
) -> Result<ReviewContext> {
    let info = &payload.pull_request;
    let files = client
        .list_pull_request_files(
            payload.installation_id,
            &payload.repository.full_name,
            info.number,
        )
        .await
        .context("Failed to list pull request files")?;

    Ok(ReviewContext::PullRequest(PullRequestReviewContext {
        repository: payload.repository.full_name.clone(),
        installation_id: payload.installation_id,
        pull_number: info.number,
        title: info.title.clone(),
        head_sha: info.head.sha.clone(),
        base_sha: info.base.sha.clone(),
        head_ref: info.head.git_ref.clone(),
        files: serialize_files(&files),
        url: info.url.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialize_files_accepts_both_path_keys() {
        let files = vec![
            json!({ "filename": "src/a.rs", "status": "modified", "additions": 3, "deletions": 1, "patch": "@@" }),
            json!({ "path": "src/b.rs", "status": "added", "additions": 10, "deletions": 0 }),
        ];
        let patches = serialize_files(&files);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].path, "src/a.rs");
        assert_eq!(patches[0].patch.as_deref(), Some("@@"));
        assert_eq!(patches[1].path, "src/b.rs");
        assert_eq!(patches[1].patch, None);
    }

    #[test]
    fn test_serialize_files_drops_pathless_entries() {
        let files = vec![
            json!({ "status": "removed" }),
            json!({ "filename": "", "status": "removed" }),
            json!({ "filename": "kept.rs", "status": "modified" }),
        ];
        let patches = serialize_files(&files);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].path, "kept.rs");
    }
}

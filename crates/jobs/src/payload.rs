//! Typed webhook job payloads carried through the review queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: Option<u64>,
    pub full_name: String,
    pub owner: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub installation_id: u64,
    pub repository: RepositoryInfo,
    pub git_ref: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    #[serde(default)]
    pub commits: Vec<String>,
    #[serde(default)]
    pub pusher: Value,
    pub compare: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestEndpoint {
    pub git_ref: Option<String>,
    pub sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: Option<String>,
    pub url: Option<String>,
    pub head: PullRequestEndpoint,
    pub base: PullRequestEndpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestPayload {
    pub installation_id: u64,
    pub repository: RepositoryInfo,
    pub action: String,
    pub pull_request: PullRequestInfo,
    #[serde(default)]
    pub sender: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum JobPayload {
    Push(PushPayload),
    PullRequest(PullRequestPayload),
}

impl JobPayload {
    pub fn event_kind(&self) -> &'static str {
        match self {
            Self::Push(_) => "push",
            Self::PullRequest(_) => "pull_request",
        }
    }

    pub fn repository_full_name(&self) -> &str {
        match self {
            Self::Push(payload) => &payload.repository.full_name,
            Self::PullRequest(payload) => &payload.repository.full_name,
        }
    }

    pub fn installation_id(&self) -> u64 {
        match self {
            Self::Push(payload) => payload.installation_id,
            Self::PullRequest(payload) => payload.installation_id,
        }
    }
}

/// One unit of work, created at webhook ingestion and consumed exactly once
/// by the queue worker. The delivery id doubles as the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewJob {
    pub delivery_id: String,
    pub payload: JobPayload,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl ReviewJob {
    pub fn new(delivery_id: String, payload: JobPayload) -> Self {
        Self { delivery_id, payload, received_at: OffsetDateTime::now_utc() }
    }
}

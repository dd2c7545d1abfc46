use serde::{Deserialize, Serialize};

/// One changed file from a commit compare or PR file listing.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct FilePatch {
    pub path: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushReviewContext {
    pub repository: String,
    pub installation_id: u64,
    pub git_ref: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub commits: Vec<String>,
    pub files: Vec<FilePatch>,
    pub compare_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestReviewContext {
    pub repository: String,
    pub installation_id: u64,
    pub pull_number: u64,
    pub title: Option<String>,
    pub head_sha: Option<String>,
    pub base_sha: Option<String>,
    pub head_ref: Option<String>,
    pub files: Vec<FilePatch>,
    pub url: Option<String>,
}

/// Everything the agent client and publisher need to know about one review.
/// Built once per job and treated as read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReviewContext {
    Push(PushReviewContext),
    PullRequest(PullRequestReviewContext),
}

impl ReviewContext {
    pub fn repository(&self) -> &str {
        match self {
            Self::Push(ctx) => &ctx.repository,
            Self::PullRequest(ctx) => &ctx.repository,
        }
    }

    pub fn installation_id(&self) -> u64 {
        match self {
            Self::Push(ctx) => ctx.installation_id,
            Self::PullRequest(ctx) => ctx.installation_id,
        }
    }

    pub fn files(&self) -> &[FilePatch] {
        match self {
            Self::Push(ctx) => &ctx.files,
            Self::PullRequest(ctx) => &ctx.files,
        }
    }
}

/// One actionable review comment with a location.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub path: String,
    pub start_line: u64,
    pub end_line: Option<u64>,
    pub message: String,
    pub severity: Option<String>,
}

/// Terminal artifact of one review job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewAnalysis {
    pub comments: Vec<ReviewFinding>,
    pub summary: Option<String>,
}

impl ReviewAnalysis {
    pub fn is_empty(&self) -> bool { self.comments.is_empty() && self.summary.is_none() }
}

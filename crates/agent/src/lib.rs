//! Client for the external review agent API.
//!
//! One `analyze` call drives the full round trip for a review context:
//! prompt construction, session creation, long-polling the session's
//! activity feed for a JSON result fragment, and parsing that fragment into
//! findings. The agent API is eventually consistent; the polling loop
//! classifies errors into retryable and fatal tiers with per-tier backoff.

pub mod extract;
pub mod prompt;

use std::time::Duration;

use patchpilot_core::{
    config::{AgentConfig, PollConfig},
    models::{ReviewAnalysis, ReviewContext},
};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::time::sleep;

use crate::{
    extract::{extract_agent_messages, extract_json_fragment, parse_analysis},
    prompt::build_prompt,
};

const API_KEY_HEADER: &str = "X-Goog-Api-Key";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent API request failed while trying to {action}: status {status}")]
    Api { action: &'static str, status: StatusCode, body: Option<Value> },
    #[error("agent session did not return an identifier")]
    MissingSessionId,
    #[error("agent session {0} not found; the repository source may not be registered")]
    SessionNotFound(String),
    #[error("unable to parse agent response into review findings")]
    Parse,
    #[error("invalid repository format '{0}', expected 'owner/repo'")]
    InvalidRepository(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AgentError {
    fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// How the polling loop reacts to an upstream API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorDisposition {
    RetryAfter(Duration),
    /// 404 past the initialization grace window: the session truly does not
    /// exist and further polling is pointless.
    FatalNotFound,
    Fatal,
}

fn classify_poll_error(status: StatusCode, attempt: u32, poll: &PollConfig) -> ErrorDisposition {
    let base = Duration::from_millis(poll.delay_ms);
    if status == StatusCode::NOT_FOUND {
        // A fresh session can 404 for a few polls while it initializes.
        if attempt < poll.max_not_found_retries {
            return ErrorDisposition::RetryAfter(base * 2 * (attempt + 1));
        }
        return ErrorDisposition::FatalNotFound;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ErrorDisposition::RetryAfter(base * 2u32.pow(attempt.min(16)));
    }
    if status.is_server_error() {
        return ErrorDisposition::RetryAfter(base * attempt.max(1));
    }
    ErrorDisposition::Fatal
}

/// Source of activity feed pages, factored out of the HTTP client so the
/// polling loop can be driven by scripted feeds in tests.
pub(crate) trait ActivitiesApi {
    async fn list_activities(
        &self,
        session_id: &str,
        page_size: u32,
    ) -> Result<Value, AgentError>;
}

/// Poll the activity feed until a JSON fragment appears, attempts run out,
/// or a fatal error is hit. Exhaustion without a fragment is `Ok(None)`, not
/// an error.
async fn poll_for_response<A: ActivitiesApi>(
    api: &A,
    session_id: &str,
    poll: &PollConfig,
) -> Result<Option<String>, AgentError> {
    let base_delay = Duration::from_millis(poll.delay_ms);
    for attempt in 0..poll.attempts {
        tracing::debug!(
            session = session_id,
            attempt = attempt + 1,
            attempts = poll.attempts,
            "Polling agent activities"
        );
        match api.list_activities(session_id, poll.page_size).await {
            Ok(page) => {
                for text in extract_agent_messages(&page) {
                    if let Some(fragment) = extract_json_fragment(&text) {
                        tracing::info!(
                            session = session_id,
                            attempt = attempt + 1,
                            "Found JSON response in agent activities"
                        );
                        return Ok(Some(fragment));
                    }
                }
                if attempt + 1 < poll.attempts {
                    // Scale the pause down as attempts accumulate so total
                    // wait does not grow linearly with the attempt count.
                    let pause = base_delay * (attempt + 1) / poll.attempts;
                    sleep(pause).await;
                }
            }
            Err(err) => {
                let Some(status) = err.status() else {
                    return Err(err);
                };
                match classify_poll_error(status, attempt, poll) {
                    ErrorDisposition::RetryAfter(delay) => {
                        tracing::warn!(
                            session = session_id,
                            %status,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable agent API error while polling"
                        );
                        if attempt + 1 < poll.attempts {
                            sleep(delay).await;
                        }
                    }
                    ErrorDisposition::FatalNotFound => {
                        tracing::error!(
                            session = session_id,
                            attempt = attempt + 1,
                            "Agent session not found after retries"
                        );
                        return Err(AgentError::SessionNotFound(session_id.to_string()));
                    }
                    ErrorDisposition::Fatal => return Err(err),
                }
            }
        }
    }
    tracing::warn!(session = session_id, attempts = poll.attempts, "No agent response received");
    Ok(None)
}

pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    poll: PollConfig,
}

impl AgentClient {
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            poll: config.poll.clone(),
        })
    }

    /// Run one full analysis round trip for a review context.
    pub async fn analyze(&self, context: &ReviewContext) -> Result<ReviewAnalysis, AgentError> {
        let prompt = build_prompt(context);
        tracing::debug!(
            repository = context.repository(),
            files = context.files().len(),
            prompt_chars = prompt.len(),
            "Built review prompt"
        );

        let session = self.create_session(context, &prompt).await?;
        let session_id = session
            .get("name")
            .and_then(Value::as_str)
            .ok_or(AgentError::MissingSessionId)?
            .to_string();
        tracing::info!(
            session = session_id,
            repository = context.repository(),
            "Created agent session"
        );

        let Some(raw) = poll_for_response(self, &session_id, &self.poll).await? else {
            tracing::warn!(repository = context.repository(), "Agent returned no analysis");
            return Ok(ReviewAnalysis::default());
        };

        let analysis = parse_analysis(&raw).ok_or(AgentError::Parse)?;
        tracing::info!(
            repository = context.repository(),
            comments = analysis.comments.len(),
            has_summary = analysis.summary.is_some(),
            "Agent analysis parsed"
        );
        Ok(analysis)
    }

    async fn create_session(
        &self,
        context: &ReviewContext,
        prompt: &str,
    ) -> Result<Value, AgentError> {
        let repository = context.repository();
        let Some((owner, repo)) = repository.split_once('/') else {
            return Err(AgentError::InvalidRepository(repository.to_string()));
        };

        let mut source_context = json!({
            "source": format!("sources/github/{owner}/{repo}"),
        });
        if let Some(branch) = starting_branch(context) {
            source_context["githubRepoContext"] = json!({ "startingBranch": branch });
        }
        let request_body = json!({
            "prompt": prompt,
            "title": format!("Code review for {repository}"),
            "sourceContext": source_context,
        });

        let response = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request_body)
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.json::<Value>().await.ok();
            return Err(AgentError::Api { action: "create session", status, body });
        }
        Ok(response.json().await?)
    }
}

impl ActivitiesApi for AgentClient {
    async fn list_activities(
        &self,
        session_id: &str,
        page_size: u32,
    ) -> Result<Value, AgentError> {
        let response = self
            .http
            .get(format!("{}/{}/activities", self.base_url, session_id))
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("pageSize", page_size)])
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.json::<Value>().await.ok();
            return Err(AgentError::Api { action: "list activities", status, body });
        }
        Ok(response.json().await?)
    }
}

/// Branch the agent should check out, when resolvable from the context.
fn starting_branch(context: &ReviewContext) -> Option<&str> {
    match context {
        ReviewContext::Push(ctx) => {
            ctx.git_ref.as_deref().and_then(|r| r.strip_prefix("refs/heads/"))
        }
        ReviewContext::PullRequest(ctx) => ctx.head_ref.as_deref(),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    use patchpilot_core::models::PushReviewContext;
    use serde_json::json;

    use super::*;

    struct ScriptedFeed {
        pages: Mutex<VecDeque<Result<Value, AgentError>>>,
        calls: AtomicU32,
    }

    impl ScriptedFeed {
        fn new(pages: Vec<Result<Value, AgentError>>) -> Self {
            Self { pages: Mutex::new(pages.into()), calls: AtomicU32::new(0) }
        }

        fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }
    }

    impl ActivitiesApi for ScriptedFeed {
        async fn list_activities(&self, _: &str, _: u32) -> Result<Value, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "activities": [] })))
        }
    }

    fn fast_poll() -> PollConfig {
        PollConfig { attempts: 10, delay_ms: 1, page_size: 50, max_not_found_retries: 3 }
    }

    fn empty_page() -> Result<Value, AgentError> {
        Ok(json!({ "activities": [] }))
    }

    fn result_page() -> Result<Value, AgentError> {
        Ok(json!({
            "activities": [{
                "originator": "agent",
                "messages": [{ "text": "```json\n{\"summary\": \"ok\", \"comments\": []}```" }]
            }]
        }))
    }

    fn api_error(status: StatusCode) -> Result<Value, AgentError> {
        Err(AgentError::Api { action: "list activities", status, body: None })
    }

    #[tokio::test]
    async fn test_poll_short_circuits_on_first_fragment() {
        let feed = ScriptedFeed::new(vec![empty_page(), empty_page(), result_page()]);
        let result = poll_for_response(&feed, "sessions/abc", &fast_poll()).await.unwrap();
        assert_eq!(result.as_deref(), Some("{\"summary\": \"ok\", \"comments\": []}"));
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test]
    async fn test_poll_tolerates_initial_not_found() {
        let feed = ScriptedFeed::new(vec![
            api_error(StatusCode::NOT_FOUND),
            api_error(StatusCode::NOT_FOUND),
            api_error(StatusCode::NOT_FOUND),
            result_page(),
        ]);
        let result = poll_for_response(&feed, "sessions/abc", &fast_poll()).await.unwrap();
        assert!(result.is_some());
        assert_eq!(feed.calls(), 4);
    }

    #[tokio::test]
    async fn test_poll_persistent_not_found_is_fatal() {
        let feed = ScriptedFeed::new(vec![
            api_error(StatusCode::NOT_FOUND),
            api_error(StatusCode::NOT_FOUND),
            api_error(StatusCode::NOT_FOUND),
            api_error(StatusCode::NOT_FOUND),
        ]);
        let err = poll_for_response(&feed, "sessions/abc", &fast_poll()).await.unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
        // Fatal on the first 404 past the grace window
        assert_eq!(feed.calls(), 4);
    }

    #[tokio::test]
    async fn test_poll_retries_rate_limit_and_server_errors() {
        let feed = ScriptedFeed::new(vec![
            api_error(StatusCode::TOO_MANY_REQUESTS),
            api_error(StatusCode::BAD_GATEWAY),
            result_page(),
        ]);
        let result = poll_for_response(&feed, "sessions/abc", &fast_poll()).await.unwrap();
        assert!(result.is_some());
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test]
    async fn test_poll_other_statuses_are_fatal() {
        let feed = ScriptedFeed::new(vec![api_error(StatusCode::BAD_REQUEST)]);
        let err = poll_for_response(&feed, "sessions/abc", &fast_poll()).await.unwrap_err();
        assert!(matches!(&err, AgentError::Api { status, .. } if *status == StatusCode::BAD_REQUEST));
        assert_eq!(feed.calls(), 1);
    }

    #[tokio::test]
    async fn test_poll_exhaustion_is_no_result() {
        let mut poll = fast_poll();
        poll.attempts = 3;
        let feed = ScriptedFeed::new(vec![]);
        let result = poll_for_response(&feed, "sessions/abc", &poll).await.unwrap();
        assert!(result.is_none());
        assert_eq!(feed.calls(), 3);
    }

    #[test]
    fn test_classify_backoff_tiers() {
        let poll = fast_poll();
        let base = Duration::from_millis(poll.delay_ms);
        assert_eq!(
            classify_poll_error(StatusCode::NOT_FOUND, 0, &poll),
            ErrorDisposition::RetryAfter(base * 2)
        );
        assert_eq!(
            classify_poll_error(StatusCode::NOT_FOUND, 3, &poll),
            ErrorDisposition::FatalNotFound
        );
        assert_eq!(
            classify_poll_error(StatusCode::TOO_MANY_REQUESTS, 3, &poll),
            ErrorDisposition::RetryAfter(base * 8)
        );
        assert_eq!(
            classify_poll_error(StatusCode::INTERNAL_SERVER_ERROR, 4, &poll),
            ErrorDisposition::RetryAfter(base * 4)
        );
        assert_eq!(classify_poll_error(StatusCode::FORBIDDEN, 0, &poll), ErrorDisposition::Fatal);
    }

    #[test]
    fn test_starting_branch() {
        let mut ctx = PushReviewContext {
            repository: "octo/widgets".to_string(),
            installation_id: 1,
            git_ref: Some("refs/heads/main".to_string()),
            before: None,
            after: None,
            commits: vec![],
            files: vec![],
            compare_url: None,
        };
        assert_eq!(starting_branch(&ReviewContext::Push(ctx.clone())), Some("main"));
        ctx.git_ref = Some("refs/tags/v1.0".to_string());
        assert_eq!(starting_branch(&ReviewContext::Push(ctx)), None);
    }
}

//! Webhook payload normalization.
//!
//! Maps raw GitHub event JSON into a typed job payload. The outcome is
//! three-way: accepted (a job payload), ignored (unsupported event or
//! action, acknowledged upstream), or invalid (required fields missing on a
//! supported event type, a client error). Ignored and invalid must stay
//! distinct; only accepted events are enqueued.

use serde_json::Value;

use crate::payload::{
    JobPayload, PullRequestEndpoint, PullRequestInfo, PullRequestPayload, PushPayload,
    RepositoryInfo,
};

const SUPPORTED_PR_ACTIONS: &[&str] = &["opened", "reopened", "synchronize", "ready_for_review"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// Acknowledge without enqueueing. Not an error upstream.
    Ignored(String),
    /// Reject with a client error. Never enqueued.
    Invalid(String),
}

pub fn normalize_event(event: &str, payload: &Value) -> Result<JobPayload, NormalizeError> {
    match event {
        "push" => normalize_push(payload).map(JobPayload::Push),
        "pull_request" => normalize_pull_request(payload).map(JobPayload::PullRequest),
        _ => Err(NormalizeError::Ignored(format!("Event '{event}' is not handled"))),
    }
}

fn normalize_push(payload: &Value) -> Result<PushPayload, NormalizeError> {
    let installation_id = installation_id(payload)
        .ok_or_else(|| NormalizeError::Invalid("Push event missing installation id".into()))?;
    let repository = repository_info(payload)
        .ok_or_else(|| NormalizeError::Invalid("Push event missing repository metadata".into()))?;

    let commits = payload
        .get("commits")
        .and_then(Value::as_array)
        .map(|commits| {
            commits
                .iter()
                .filter_map(|commit| commit.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(PushPayload {
        installation_id,
        repository,
        git_ref: string_field(payload, "ref"),
        before: string_field(payload, "before"),
        after: string_field(payload, "after"),
        commits,
        pusher: payload.get("pusher").cloned().unwrap_or(Value::Null),
        compare: string_field(payload, "compare"),
    })
}

fn normalize_pull_request(payload: &Value) -> Result<PullRequestPayload, NormalizeError> {
    let action = string_field(payload, "action").unwrap_or_default();
    if !SUPPORTED_PR_ACTIONS.contains(&action.as_str()) {
        return Err(NormalizeError::Ignored(format!(
            "Pull request action '{action}' not actionable"
        )));
    }

    let installation_id = installation_id(payload).ok_or_else(|| {
        NormalizeError::Invalid("Pull request event missing installation id".into())
    })?;
    let repository = repository_info(payload).ok_or_else(|| {
        NormalizeError::Invalid("Pull request event missing repository metadata".into())
    })?;
    let pull_request = payload.get("pull_request").cloned().unwrap_or(Value::Null);
    let number = pull_request
        .get("number")
        .and_then(Value::as_u64)
        .filter(|n| *n != 0)
        .ok_or_else(|| NormalizeError::Invalid("Pull request payload missing number".into()))?;

    Ok(PullRequestPayload {
        installation_id,
        repository,
        action,
        pull_request: PullRequestInfo {
            number,
            title: string_field(&pull_request, "title"),
            url: string_field(&pull_request, "html_url"),
            head: endpoint(pull_request.get("head")),
            base: endpoint(pull_request.get("base")),
        },
        sender: payload.get("sender").cloned().unwrap_or(Value::Null),
    })
}

fn installation_id(payload: &Value) -> Option<u64> {
    payload
        .get("installation")
        .and_then(|i| i.get("id"))
        .and_then(Value::as_u64)
        .filter(|id| *id != 0)
}

fn repository_info(payload: &Value) -> Option<RepositoryInfo> {
    let repository = payload.get("repository")?;
    let full_name = string_field(repository, "full_name").filter(|s| !s.is_empty())?;
    Some(RepositoryInfo {
        id: repository.get("id").and_then(Value::as_u64),
        full_name,
        owner: repository.get("owner").and_then(|o| o.get("login")).and_then(Value::as_str).map(str::to_string),
        name: string_field(repository, "name"),
    })
}

fn endpoint(raw: Option<&Value>) -> PullRequestEndpoint {
    PullRequestEndpoint {
        git_ref: raw.and_then(|v| string_field(v, "ref")),
        sha: raw.and_then(|v| string_field(v, "sha")),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn push_payload() -> Value {
        json!({
            "ref": "refs/heads/main",
            "before": "aaa111",
            "after": "bbb222",
            "installation": { "id": 42 },
            "repository": {
                "id": 7,
                "full_name": "octo/widgets",
                "name": "widgets",
                "owner": { "login": "octo" }
            },
            "commits": [{ "id": "bbb222" }, { "id": "ccc333" }, { "message": "no id" }],
            "pusher": { "name": "octocat" },
            "compare": "https://github.com/octo/widgets/compare/aaa111...bbb222"
        })
    }

    fn pull_request_payload(action: &str) -> Value {
        json!({
            "action": action,
            "installation": { "id": 42 },
            "repository": { "id": 7, "full_name": "octo/widgets" },
            "pull_request": {
                "number": 13,
                "title": "Add frobnicator",
                "html_url": "https://github.com/octo/widgets/pull/13",
                "head": { "ref": "feature/frob", "sha": "feedbeef" },
                "base": { "ref": "main", "sha": "baseba5e" }
            },
            "sender": { "login": "octocat" }
        })
    }

    #[test]
    fn test_push_accepted() {
        let JobPayload::Push(push) = normalize_event("push", &push_payload()).unwrap() else {
            panic!("expected push payload");
        };
        assert_eq!(push.installation_id, 42);
        assert_eq!(push.repository.full_name, "octo/widgets");
        assert_eq!(push.git_ref.as_deref(), Some("refs/heads/main"));
        assert_eq!(push.commits, vec!["bbb222", "ccc333"]);
    }

    #[test]
    fn test_push_missing_installation_is_invalid() {
        let mut payload = push_payload();
        payload.as_object_mut().unwrap().remove("installation");
        let err = normalize_event("push", &payload).unwrap_err();
        assert!(matches!(err, NormalizeError::Invalid(_)));
    }

    #[test]
    fn test_push_missing_repository_is_invalid() {
        let mut payload = push_payload();
        payload.as_object_mut().unwrap().remove("repository");
        assert!(matches!(
            normalize_event("push", &payload),
            Err(NormalizeError::Invalid(_))
        ));
    }

    #[test]
    fn test_pull_request_accepted_actions() {
        for action in ["opened", "reopened", "synchronize", "ready_for_review"] {
            let payload = pull_request_payload(action);
            let JobPayload::PullRequest(pr) = normalize_event("pull_request", &payload).unwrap()
            else {
                panic!("expected pull request payload");
            };
            assert_eq!(pr.action, action);
            assert_eq!(pr.pull_request.number, 13);
            assert_eq!(pr.pull_request.head.sha.as_deref(), Some("feedbeef"));
        }
    }

    #[test]
    fn test_pull_request_closed_is_ignored() {
        let err = normalize_event("pull_request", &pull_request_payload("closed")).unwrap_err();
        assert!(matches!(err, NormalizeError::Ignored(_)));
    }

    #[test]
    fn test_pull_request_missing_number_is_invalid() {
        let mut payload = pull_request_payload("opened");
        payload["pull_request"].as_object_mut().unwrap().remove("number");
        assert!(matches!(
            normalize_event("pull_request", &payload),
            Err(NormalizeError::Invalid(_))
        ));
    }

    #[test]
    fn test_unhandled_event_is_ignored() {
        let err = normalize_event("issue_comment", &json!({})).unwrap_err();
        assert!(matches!(err, NormalizeError::Ignored(_)));
    }
}

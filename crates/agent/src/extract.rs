//! Extraction of review results from the agent's activity feed.
//!
//! The agent streams an append-only feed of activities (messages, progress
//! updates, outputs). Somewhere in that feed, once analysis completes, is a
//! JSON object with the findings. These helpers pull agent-authored texts out
//! of a feed page and locate the first parseable JSON fragment.

use std::sync::OnceLock;

use patchpilot_core::models::{ReviewAnalysis, ReviewFinding};
use regex::Regex;
use serde_json::Value;

/// Collect every agent-authored text from one activities page: message
/// texts, progress descriptions, and pull request output descriptions.
pub fn extract_agent_messages(payload: &Value) -> Vec<String> {
    let mut texts = Vec::new();
    let activities = payload.get("activities").and_then(Value::as_array);
    for activity in activities.map(Vec::as_slice).unwrap_or_default() {
        if activity.get("originator").and_then(Value::as_str) != Some("agent") {
            continue;
        }
        if let Some(messages) = activity.get("messages").and_then(Value::as_array) {
            for message in messages {
                if let Some(text) = message.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
        }
        if let Some(description) = activity
            .get("progressUpdated")
            .and_then(|p| p.get("description"))
            .and_then(Value::as_str)
        {
            texts.push(description.to_string());
        }
        if let Some(outputs) = activity.get("outputs").and_then(Value::as_array) {
            for output in outputs {
                if let Some(description) = output
                    .get("pullRequest")
                    .and_then(|pr| pr.get("description"))
                    .and_then(Value::as_str)
                {
                    texts.push(description.to_string());
                }
            }
        }
    }
    texts
}

/// Locate a JSON object fragment in a text, preferring a fenced code block,
/// then a bare `{...}` body, then a regex-extracted brace span.
pub fn extract_json_fragment(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.starts_with('`') {
        static FENCED: OnceLock<Regex> = OnceLock::new();
        let regex = FENCED
            .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})```").unwrap());
        if let Some(caps) = regex.captures(text) {
            return Some(caps[1].to_string());
        }
    }

    if text.starts_with('{') && text.ends_with('}') {
        return Some(text.to_string());
    }

    static BRACES: OnceLock<Regex> = OnceLock::new();
    let regex = BRACES.get_or_init(|| Regex::new(r"(?s)(\{.*\})").unwrap());
    regex.captures(text).map(|caps| caps[1].to_string())
}

/// Parse an extracted JSON fragment into a `ReviewAnalysis`. Entries that
/// fail line-number coercion or lack a path/message are dropped one by one;
/// a syntactically invalid fragment returns `None` and is fatal to the job.
pub fn parse_analysis(raw_json: &str) -> Option<ReviewAnalysis> {
    let data: Value = serde_json::from_str(raw_json).ok()?;

    let mut findings = Vec::new();
    let comments = data.get("comments").and_then(Value::as_array);
    for entry in comments.map(Vec::as_slice).unwrap_or_default() {
        let Some(start_line) = coerce_line(entry.get("start_line")) else {
            continue;
        };
        let end_line = match entry.get("end_line") {
            None | Some(Value::Null) => None,
            raw => match coerce_line(raw) {
                Some(line) => Some(line),
                None => continue,
            },
        };
        let Some(path) = entry.get("path").and_then(Value::as_str).filter(|s| !s.is_empty())
        else {
            continue;
        };
        let Some(message) = entry.get("message").and_then(Value::as_str).filter(|s| !s.is_empty())
        else {
            continue;
        };
        let severity = entry
            .get("severity")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        findings.push(ReviewFinding {
            path: path.to_string(),
            start_line,
            end_line,
            message: message.trim().to_string(),
            severity,
        });
    }

    let summary = data
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(ReviewAnalysis { comments: findings, summary })
}

fn coerce_line(raw: Option<&Value>) -> Option<u64> {
    match raw? {
        Value::Number(n) => n.as_u64(),
        // Agents occasionally quote numbers
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

//! Deterministic prompt construction for the review agent.
//!
//! The prompt is a context header (variant-specific metadata) followed by
//! per-file unified-diff excerpts. Both the file count and per-file patch
//! size are capped to bound request size and latency against the remote
//! agent; truncation is marked explicitly so the agent knows the diff is
//! incomplete.

use patchpilot_core::models::ReviewContext;

pub const MAX_PROMPT_FILES: usize = 15;
pub const MAX_PATCH_CHARS: usize = 4000;

const INSTRUCTIONS: &str = "\
You are an automated code reviewer. Analyze the provided Git diff patches and \
return actionable findings. Respond *only* with valid JSON matching this schema:
{
  \"summary\": string,
  \"comments\": [
    {
      \"path\": string,
      \"start_line\": integer,
      \"end_line\": integer|null,
      \"message\": string,
      \"severity\": one of [\"critical\", \"major\", \"minor\", \"info\"]
    }
  ]
}
Focus on bugs, security issues, or major regressions. Omit stylistic nitpicks.";

pub fn build_prompt(context: &ReviewContext) -> String {
    let header = match context {
        ReviewContext::PullRequest(ctx) => format!(
            "Repository: {}\nPull Request: #{} - {}\nHead SHA: {} | Base SHA: {}\n",
            ctx.repository,
            ctx.pull_number,
            ctx.title.as_deref().unwrap_or("untitled"),
            ctx.head_sha.as_deref().unwrap_or("unknown"),
            ctx.base_sha.as_deref().unwrap_or("unknown"),
        ),
        ReviewContext::Push(ctx) => {
            let commits = if ctx.commits.is_empty() {
                "(no commit list)".to_string()
            } else {
                ctx.commits.join(", ")
            };
            format!(
                "Repository: {}\nRef: {}\nAfter: {} | Before: {}\nCommits: {}\n",
                ctx.repository,
                ctx.git_ref.as_deref().unwrap_or("unknown"),
                ctx.after.as_deref().unwrap_or("unknown"),
                ctx.before.as_deref().unwrap_or("unknown"),
                commits,
            )
        }
    };
    let files = format_files_for_prompt(context);
    format!("{INSTRUCTIONS}\n\nContext:\n{header}\nDiffs:\n{files}").trim().to_string()
}

fn format_files_for_prompt(context: &ReviewContext) -> String {
    let files = context.files();
    let mut sections = Vec::new();
    for (index, file) in files.iter().take(MAX_PROMPT_FILES).enumerate() {
        let patch = match &file.patch {
            Some(patch) => truncate_patch(patch),
            None => "(no patch available)".to_string(),
        };
        sections.push(format!(
            "### File {}: {}\nStatus: {}\nPatch:\n{}",
            index + 1,
            file.path,
            file.status,
            patch
        ));
    }
    if files.len() > MAX_PROMPT_FILES {
        sections.push(format!("(Truncated to {} files of {} total)", MAX_PROMPT_FILES, files.len()));
    }
    sections.join("\n\n")
}

fn truncate_patch(patch: &str) -> String {
    if patch.chars().count() <= MAX_PATCH_CHARS {
        return patch.to_string();
    }
    let truncated: String = patch.chars().take(MAX_PATCH_CHARS).collect();
    format!("{truncated}\n... (truncated)")
}

#[cfg(test)]
mod tests {
    use patchpilot_core::models::{FilePatch, PullRequestReviewContext, PushReviewContext};

    use super::*;

    fn file(path: &str) -> FilePatch {
        FilePatch {
            path: path.to_string(),
            status: "modified".to_string(),
            additions: 1,
            deletions: 0,
            patch: Some(format!("@@ -1 +1 @@\n-old\n+new in {path}")),
        }
    }

    fn push_context(files: Vec<FilePatch>) -> ReviewContext {
        ReviewContext::Push(PushReviewContext {
            repository: "octo/widgets".to_string(),
            installation_id: 42,
            git_ref: Some("refs/heads/main".to_string()),
            before: Some("aaa".to_string()),
            after: Some("bbb".to_string()),
            commits: vec!["bbb".to_string()],
            files,
            compare_url: None,
        })
    }

    #[test]
    fn test_every_path_appears_in_order() {
        let paths = ["src/a.rs", "src/b.rs", "docs/c.md"];
        let context = push_context(paths.iter().map(|p| file(p)).collect());
        let prompt = build_prompt(&context);
        let mut last = 0;
        for path in paths {
            let pos = prompt[last..].find(path).expect("path missing from prompt");
            last += pos;
        }
    }

    #[test]
    fn test_file_count_cap() {
        let files = (0..20).map(|i| file(&format!("src/file_{i}.rs"))).collect();
        let prompt = build_prompt(&push_context(files));
        assert!(prompt.contains("src/file_14.rs"));
        assert!(!prompt.contains("src/file_15.rs"));
        assert!(prompt.contains("(Truncated to 15 files of 20 total)"));
    }

    #[test]
    fn test_patch_size_cap() {
        let mut big = file("src/big.rs");
        big.patch = Some("x".repeat(MAX_PATCH_CHARS + 100));
        let prompt = build_prompt(&push_context(vec![big]));
        assert!(prompt.contains("... (truncated)"));
    }

    #[test]
    fn test_missing_patch_placeholder() {
        let mut binary = file("assets/logo.png");
        binary.patch = None;
        let prompt = build_prompt(&push_context(vec![binary]));
        assert!(prompt.contains("(no patch available)"));
    }

    #[test]
    fn test_pull_request_header() {
        let context = ReviewContext::PullRequest(PullRequestReviewContext {
            repository: "octo/widgets".to_string(),
            installation_id: 42,
            pull_number: 7,
            title: Some("Fix the frobnicator".to_string()),
            head_sha: Some("feedbeef".to_string()),
            base_sha: Some("baseba5e".to_string()),
            head_ref: Some("fix/frobnicator".to_string()),
            files: vec![file("src/frob.rs")],
            url: None,
        });
        let prompt = build_prompt(&context);
        assert!(prompt.contains("Pull Request: #7 - Fix the frobnicator"));
        assert!(prompt.contains("Head SHA: feedbeef | Base SHA: baseba5e"));
    }
}

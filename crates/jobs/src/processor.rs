//! Runs one review job end to end.

use std::sync::Arc;

use anyhow::{Context, Result};
use patchpilot_agent::AgentClient;
use patchpilot_github::GitHubClient;

use crate::{
    context::build_review_context,
    payload::ReviewJob,
    publish::publish_analysis,
    queue::JobHandler,
};

pub struct ReviewProcessor {
    github: Arc<GitHubClient>,
    agent: Arc<AgentClient>,
}

impl ReviewProcessor {
    pub fn new(github: Arc<GitHubClient>, agent: Arc<AgentClient>) -> Self {
        Self { github, agent }
    }

    /// Build the diff context, run the analysis, publish the results.
    pub async fn process(&self, job: &ReviewJob) -> Result<()> {
        tracing::info!(
            delivery_id = job.delivery_id,
            event = job.payload.event_kind(),
            repository = job.payload.repository_full_name(),
            "Processing review job"
        );

        let context = build_review_context(&self.github, job)
            .await
            .context("Failed to build review context")?;
        if context.files().is_empty() {
            tracing::info!(
                delivery_id = job.delivery_id,
                "No changed files in review context; nothing to analyze"
            );
            return Ok(());
        }

        let analysis = self
            .agent
            .analyze(&context)
            .await
            .context("Agent analysis failed")?;
        if analysis.is_empty() {
            tracing::info!(delivery_id = job.delivery_id, "Analysis produced no findings");
            return Ok(());
        }

        publish_analysis(&self.github, &context, &analysis).await;
        Ok(())
    }

    /// Adapt the processor into the queue's handler shape.
    pub fn into_handler(self: Arc<Self>) -> JobHandler {
        Arc::new(move |job| {
            let processor = self.clone();
            Box::pin(async move { processor.process(&job).await })
        })
    }
}

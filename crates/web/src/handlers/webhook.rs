use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use patchpilot_github::webhook::WebhookDelivery;
use patchpilot_jobs::{
    ReviewJob,
    normalize::{NormalizeError, normalize_event},
};
use serde_json::json;

use crate::AppState;

/// Webhook handler that acknowledges quickly and defers review work to the
/// queue. Signature and header validation already happened in the
/// `WebhookDelivery` extractor.
pub async fn webhook(
    State(state): State<AppState>,
    delivery: WebhookDelivery,
) -> Response {
    if state.config.agent.is_none() {
        tracing::error!("Webhook received but agent credentials are not configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "reason": "review agent is not configured" })),
        )
            .into_response();
    }

    if state.dedupe.is_duplicate(&delivery.delivery_id) {
        tracing::info!(
            delivery_id = delivery.delivery_id,
            "Duplicate delivery; acknowledging without enqueueing"
        );
        return (
            StatusCode::OK,
            Json(json!({ "status": "ignored", "reason": "duplicate" })),
        )
            .into_response();
    }

    let payload = match normalize_event(&delivery.event, &delivery.payload) {
        Ok(payload) => payload,
        Err(NormalizeError::Ignored(reason)) => {
            tracing::info!(
                delivery_id = delivery.delivery_id,
                event = delivery.event,
                "Ignoring webhook event: {reason}"
            );
            return (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "reason": reason })),
            )
                .into_response();
        }
        Err(NormalizeError::Invalid(reason)) => {
            tracing::warn!(
                delivery_id = delivery.delivery_id,
                event = delivery.event,
                "Rejecting malformed webhook event: {reason}"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "reason": reason })),
            )
                .into_response();
        }
    };

    tracing::info!(
        delivery_id = delivery.delivery_id,
        event = delivery.event,
        repository = payload.repository_full_name(),
        "Received webhook event"
    );

    let job = ReviewJob::new(delivery.delivery_id.clone(), payload);
    if let Err(err) = state.queue.enqueue(job) {
        tracing::error!(delivery_id = delivery.delivery_id, "Failed to enqueue review job: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "reason": "failed to enqueue review job" })),
        )
            .into_response();
    }
    // Mark only after the job is safely queued, so a failed enqueue does not
    // suppress a redelivery.
    state.dedupe.mark(&delivery.delivery_id);
    tracing::info!(
        delivery_id = delivery.delivery_id,
        pending = state.queue.pending(),
        "Enqueued review job"
    );

    (StatusCode::OK, Json(json!({ "status": "accepted" }))).into_response()
}

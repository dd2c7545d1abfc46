use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use patchpilot_core::config::Config;
use serde_json::{Value, json};

use crate::signature::verify_signature;

/// Verified webhook delivery. Extraction enforces the canonical order:
/// credentials configured, signature valid, payload parses, then the event
/// and delivery headers are required. Anything else never reaches a handler.
#[derive(Clone, Debug)]
#[must_use]
pub struct WebhookDelivery {
    pub event: String,
    pub delivery_id: String,
    pub payload: Value,
}

fn reject(status: StatusCode, reason: &str) -> Response {
    (status, Json(json!({ "status": "error", "reason": reason }))).into_response()
}

// Read headers into owned strings up front; borrowing the request across the
// body await would make the extractor future non-Send.
fn header_string(req: &Request, name: &str) -> Option<String> {
    req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

impl<S> FromRequest<S> for WebhookDelivery
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let config = <Arc<Config>>::from_ref(state);
        let Some(app_config) = &config.github.app else {
            tracing::error!("Webhook received but GitHub app credentials are not configured");
            return Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "GitHub app is not configured",
            ));
        };

        let signature = header_string(&req, "X-Hub-Signature-256");
        let event = header_string(&req, "X-GitHub-Event");
        let delivery_id = header_string(&req, "X-GitHub-Delivery");

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| reject(StatusCode::BAD_REQUEST, "error reading body"))?;

        if !verify_signature(&app_config.webhook_secret, &body, signature.as_deref()) {
            tracing::warn!("Webhook signature verification failed");
            return Err(reject(StatusCode::UNAUTHORIZED, "Invalid signature"));
        }

        let payload: Value = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!("Webhook payload is not valid JSON: {e}");
            reject(StatusCode::BAD_REQUEST, "Invalid JSON payload")
        })?;

        let event = event
            .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "Missing X-GitHub-Event header"))?;
        let delivery_id = delivery_id
            .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "Missing X-GitHub-Delivery header"))?;

        Ok(WebhookDelivery { event, delivery_id, payload })
    }
}

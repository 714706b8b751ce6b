//! Events API webhook: signature check, URL verification, and immediate ack.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dbgate_core::{current_unix_timestamp, is_within_skew};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use super::slack_events::{parse_slack_envelope, SlackEnvelope};
use super::ApprovalRuntime;

pub(super) const SLACK_EVENTS_ENDPOINT: &str = "/slack/events";
pub(super) const HEALTH_ENDPOINT: &str = "/healthz";
const HEADER_SIGNATURE: &str = "x-slack-signature";
const HEADER_TIMESTAMP: &str = "x-slack-request-timestamp";
const HEADER_RETRY_NUM: &str = "x-slack-retry-num";

pub(super) struct WebhookState {
    pub(super) runtime: Arc<ApprovalRuntime>,
    pub(super) signing_secret: String,
    pub(super) max_skew_seconds: u64,
}

pub(super) fn build_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(SLACK_EVENTS_ENDPOINT, post(handle_slack_events))
        .with_state(state)
}

async fn handle_health(State(state): State<Arc<WebhookState>>) -> Response {
    let queue = state.runtime.queue();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "queue_depth": queue.depth(),
            "queue_capacity": queue.capacity(),
        })),
    )
        .into_response()
}

async fn handle_slack_events(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) = authenticate_request(&headers, &body, &state) {
        tracing::warn!(error = %format!("{error:#}"), "rejected slack webhook request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response();
    }

    let envelope = match parse_slack_envelope(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("{error:#}") })),
            )
                .into_response();
        }
    };

    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            (StatusCode::OK, Json(json!({ "challenge": challenge }))).into_response()
        }
        SlackEnvelope::EventCallback { event_id, event } => {
            if let Some(retry) = header_value(&headers, HEADER_RETRY_NUM) {
                tracing::info!(event_id = %event_id, retry = %retry, "dropping slack redelivery");
                return StatusCode::OK.into_response();
            }
            let Some(event) = event else {
                tracing::debug!(event_id = %event_id, "unhandled slack event");
                return StatusCode::OK.into_response();
            };
            let runtime = Arc::clone(&state.runtime);
            tokio::spawn(async move {
                match runtime.handle_event(&event).await {
                    Ok(outcome) => {
                        tracing::debug!(event_id = %event_id, kind = event.kind(), ?outcome, "event handled")
                    }
                    Err(error) => tracing::error!(
                        event_id = %event_id,
                        kind = event.kind(),
                        error = %format!("{error:#}"),
                        "event handling failed"
                    ),
                }
            });
            StatusCode::OK.into_response()
        }
        SlackEnvelope::Other { envelope_type } => {
            tracing::debug!(envelope_type = %envelope_type, "ignoring slack envelope");
            StatusCode::OK.into_response()
        }
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn authenticate_request(headers: &HeaderMap, body: &[u8], state: &WebhookState) -> Result<()> {
    let signature = header_value(headers, HEADER_SIGNATURE)
        .ok_or_else(|| anyhow!("missing required header '{HEADER_SIGNATURE}'"))?;
    let timestamp = header_value(headers, HEADER_TIMESTAMP)
        .ok_or_else(|| anyhow!("missing required header '{HEADER_TIMESTAMP}'"))?;
    let payload = std::str::from_utf8(body).context("slack webhook body must be utf-8")?;
    verify_slack_v0_signature(payload, signature, timestamp, &state.signing_secret)?;
    let timestamp_seconds = timestamp
        .parse::<u64>()
        .with_context(|| format!("invalid webhook timestamp '{timestamp}'"))?;
    if !is_within_skew(
        timestamp_seconds,
        current_unix_timestamp(),
        state.max_skew_seconds,
    ) {
        bail!(
            "webhook timestamp {timestamp} is outside the {}s window",
            state.max_skew_seconds
        );
    }
    Ok(())
}

pub(super) fn verify_slack_v0_signature(
    payload: &str,
    signature: &str,
    timestamp: &str,
    secret: &str,
) -> Result<()> {
    let Some(digest_hex) = signature.strip_prefix("v0=") else {
        bail!("slack webhook signature must use v0=<hex> format");
    };
    let signature_bytes = decode_hex(digest_hex)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("failed to initialize webhook HMAC verifier")?;
    mac.update(format!("v0:{timestamp}:{payload}").as_bytes());
    mac.verify_slice(&signature_bytes)
        .map_err(|_| anyhow!("webhook signature verification failed"))
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("signature digest cannot be empty");
    }
    if trimmed.len() % 2 != 0 {
        bail!("signature digest must have an even number of hex characters");
    }
    trimmed
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let hex = std::str::from_utf8(pair).context("invalid utf-8 in digest")?;
            u8::from_str_radix(hex, 16)
                .with_context(|| format!("invalid hex byte '{hex}' in signature digest"))
        })
        .collect()
}

#[cfg(test)]
pub(super) fn sign_slack_v0(payload: &str, timestamp: &str, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(format!("v0:{timestamp}:{payload}").as_bytes());
    let digest = mac.finalize().into_bytes();
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("v0={hex}")
}

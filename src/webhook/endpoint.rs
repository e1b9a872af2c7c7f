use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRef, State},
    http::HeaderMap,
};
use serde_json::{Value, json};

use crate::{
    AppState, Error,
    bank_api::{ApiProvider, WebhookEvent},
    retry::Sleeper,
    sync::BankSync,
    webhook::{process_event, verify_signature},
};

/// The header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-up-authenticity-signature";

/// The state needed by the webhook endpoint.
pub struct WebhookState<P, S> {
    /// The engine events are applied through.
    pub sync: Arc<BankSync<P, S>>,
}

impl<P, S> Clone for WebhookState<P, S> {
    fn clone(&self) -> Self {
        Self {
            sync: Arc::clone(&self.sync),
        }
    }
}

impl<P, S> FromRef<AppState<P, S>> for WebhookState<P, S> {
    fn from_ref(state: &AppState<P, S>) -> Self {
        Self {
            sync: Arc::clone(&state.sync),
        }
    }
}

/// A route handler for webhook deliveries from the bank.
///
/// When a webhook secret is configured, deliveries whose signature does not
/// match the raw body are rejected with 401 before the body is parsed.
/// Without a secret, deliveries are processed unverified.
pub async fn receive_webhook<P, S>(
    State(state): State<WebhookState<P, S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, Error>
where
    P: ApiProvider + 'static,
    S: Sleeper + 'static,
{
    let sync = state.sync;

    match sync.config().webhook_secret.as_deref() {
        Some(secret) => {
            let signature = headers
                .get(SIGNATURE_HEADER)
                .and_then(|value| value.to_str().ok());

            if !verify_signature(&body, signature, Some(secret)) {
                tracing::warn!("rejecting webhook delivery with an invalid signature");
                return Err(Error::InvalidSignature);
            }
        }
        None => tracing::warn!(
            "no webhook secret is configured, processing the delivery without verifying it"
        ),
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|error| Error::InvalidWebhookPayload(error.to_string()))?;

    let outcome = process_event(&sync, &event, None).await?;

    Ok(Json(json!({"success": true, "message": outcome.to_string()})))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger webhook receiver.
//!
//! Every syntactically valid JSON body is acknowledged; ingestion failures
//! are logged and never reported back to the sender. When a shared secret
//! is configured the body must carry a matching `x-payload-hash`
//! (base64 HMAC-SHA512 of the raw body).

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha512;
use utoipa::ToSchema;

use crate::{error::ApiError, ingestor::LedgerEventBody, state::AppState};

pub const PAYLOAD_HASH_HEADER: &str = "x-payload-hash";

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    #[schema(example = "received")]
    pub status: String,
}

/// Receive a ledger event.
#[utoipa::path(
    post,
    path = "/webhooks/ledger",
    tag = "Webhooks",
    request_body = LedgerEventBody,
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Body is not valid JSON"),
        (status = 401, description = "Payload hash did not verify")
    )
)]
pub async fn ledger_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    if let Some(secret) = state.webhook_hmac_secret.as_deref() {
        let provided = headers
            .get(PAYLOAD_HASH_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_payload_hash(secret, &body, provided) {
            tracing::warn!("Rejecting webhook with invalid payload hash");
            return Err(ApiError::unauthorized("invalid payload hash"));
        }
    }

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;

    match state.ingestor.ingest(raw).await {
        Ok(outcome) => tracing::debug!(?outcome, "Webhook ingested"),
        Err(e) => tracing::warn!(error = %e, retryable = e.is_retryable(), "Webhook ingestion failed"),
    }

    Ok(Json(WebhookAck {
        status: "received".to_string(),
    }))
}

/// Check `provided` against base64(HMAC-SHA512(secret, body)).
pub fn verify_payload_hash(secret: &str, body: &[u8], provided: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    let Ok(expected) = Base64::decode_vec(provided.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the `x-payload-hash` value for `body`.
pub fn payload_hash(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(Base64::encode_string(&mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "webhook-secret";

    #[test]
    fn correct_digest_verifies() {
        let body = br#"{"eventId":"e1","type":"ACCOUNT_UPDATE"}"#;
        let hash = payload_hash(SECRET, body).unwrap();
        assert!(verify_payload_hash(SECRET, body, Some(&hash)));
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let body = br#"{"eventId":"e1","type":"ACCOUNT_UPDATE"}"#;
        let hash = payload_hash(SECRET, body).unwrap();

        assert!(!verify_payload_hash(
            SECRET,
            br#"{"eventId":"e2","type":"ACCOUNT_UPDATE"}"#,
            Some(&hash)
        ));
        assert!(!verify_payload_hash("other-secret", body, Some(&hash)));
        assert!(!verify_payload_hash(SECRET, body, None));
        assert!(!verify_payload_hash(SECRET, body, Some("%%%not base64%%%")));
    }
}

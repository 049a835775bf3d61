// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Banking partner webhook receiver.
//!
//! Deliveries go through the same idempotent ingestion path as the payment
//! poller, so a retried or duplicated delivery is harmless. When
//! `PARTNER_WEBHOOK_SECRET` is set, the raw body must carry a base64
//! HMAC-SHA256 in `x-partner-signature`.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use base64ct::{Base64, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    error::ApiError,
    providers::partner_http::TransactionPayload,
    state::AppState,
    viban::{IngestOutcome, ReconcileOutcome, Reconciler},
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-partner-signature";

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub transaction_id: String,
    /// `false` when the partner id was already known.
    pub new: bool,
    /// `reconciled`, `sent_to_review`, `skipped`, or absent for repeats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<String>,
}

/// Check a base64 HMAC-SHA256 of `body`. A `sha256=` prefix is accepted.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = Base64::decode_vec(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Receive one booked transaction from the banking partner.
#[utoipa::path(
    post,
    path = "/v1/webhooks/partner",
    tag = "Webhooks",
    request_body(content = String, description = "Partner transaction JSON", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery accepted", body = WebhookAck),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 422, description = "Unknown partner account")
    )
)]
pub async fn receive_partner_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing webhook signature"))?;
        if !verify_signature(secret.as_bytes(), &body, signature) {
            warn!("Rejected webhook with invalid signature");
            return Err(ApiError::unauthorized("invalid webhook signature"));
        }
    }

    let payload: TransactionPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid payload: {e}")))?;
    let incoming = payload
        .into_transaction()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let (ingested, reconciled) = Reconciler::new(&state.ledger, &state.reconciliation)
        .ingest_and_reconcile(&incoming, Utc::now())?;

    let reconciliation = reconciled.map(|outcome| {
        match outcome {
            ReconcileOutcome::Reconciled { .. } => "reconciled",
            ReconcileOutcome::SentToReview { .. } => "sent_to_review",
            ReconcileOutcome::Skipped { .. } => "skipped",
        }
        .to_string()
    });

    info!(
        external_id = %incoming.external_transaction_id,
        new = ingested.is_new(),
        reconciliation = reconciliation.as_deref().unwrap_or("none"),
        "Webhook delivery processed"
    );

    Ok(Json(WebhookAck {
        transaction_id: ingested.transaction().transaction_id.clone(),
        new: matches!(ingested, IngestOutcome::New(_)),
        reconciliation,
    }))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    error::ApiError,
    models::{format_minor, parse_amount_to_minor},
    state::AppState,
    storage::StoredTopUp,
    viban::{TopUpManager, VibanError},
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateTopUpRequest {
    /// Account that will receive the transfer.
    pub virtual_iban_id: String,
    /// Decimal amount, e.g. `"100.00"`.
    pub amount: String,
    pub currency: String,
}

/// A top-up request plus the text the user must put in the transfer.
#[derive(Debug, Serialize, ToSchema)]
pub struct TopUpResponse {
    #[serde(flatten)]
    pub request: StoredTopUp,
    /// Amount rendered with two decimals.
    pub amount: String,
}

impl From<StoredTopUp> for TopUpResponse {
    fn from(request: StoredTopUp) -> Self {
        let amount = format_minor(request.amount_minor);
        Self { request, amount }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TopUpListResponse {
    pub requests: Vec<TopUpResponse>,
    pub total: usize,
}

#[utoipa::path(
    get,
    path = "/v1/topups",
    tag = "TopUps",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's top-up requests", body = TopUpListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_topups(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<TopUpListResponse>, ApiError> {
    let requests: Vec<TopUpResponse> = TopUpManager::new(&state.ledger, &state.reconciliation)
        .list_for_user(&user.user_id)?
        .into_iter()
        .map(TopUpResponse::from)
        .collect();
    let total = requests.len();
    Ok(Json(TopUpListResponse { requests, total }))
}

/// Open a top-up request. The response carries the payment reference.
#[utoipa::path(
    post,
    path = "/v1/topups",
    tag = "TopUps",
    security(("bearer_auth" = [])),
    request_body = CreateTopUpRequest,
    responses(
        (status = 201, description = "Request created", body = TopUpResponse),
        (status = 400, description = "Invalid amount or currency"),
        (status = 404, description = "Account not found"),
        (status = 422, description = "Account not active or currency mismatch")
    )
)]
pub async fn create_topup(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateTopUpRequest>,
) -> Result<(StatusCode, Json<TopUpResponse>), ApiError> {
    let amount_minor = parse_amount_to_minor(&request.amount).map_err(VibanError::from)?;
    let created = TopUpManager::new(&state.ledger, &state.reconciliation).create_request(
        &user.user_id,
        &request.virtual_iban_id,
        amount_minor,
        &request.currency,
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    post,
    path = "/v1/topups/{request_id}/cancel",
    tag = "TopUps",
    security(("bearer_auth" = [])),
    params(("request_id" = String, Path, description = "Top-up request id")),
    responses(
        (status = 200, description = "Request cancelled", body = TopUpResponse),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Request is no longer pending")
    )
)]
pub async fn cancel_topup(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<TopUpResponse>, ApiError> {
    let cancelled = TopUpManager::new(&state.ledger, &state.reconciliation).cancel_request(
        &request_id,
        &user.user_id,
        Utc::now(),
    )?;
    Ok(Json(cancelled.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TopUpStatus;

    #[test]
    fn response_flattens_request_and_formats_amount() {
        let now = Utc::now();
        let request = StoredTopUp {
            request_id: "r1".to_string(),
            virtual_iban_id: "a1".to_string(),
            owner_user_id: "user_1".to_string(),
            amount_minor: 2550,
            currency: "EUR".to_string(),
            reference: "TU-ABC123".to_string(),
            normalized_reference: "tuabc123".to_string(),
            status: TopUpStatus::Pending,
            created_at: now,
            expires_at: now,
            updated_at: now,
            transaction_id: None,
            completed_at: None,
            expired_at: None,
            cancelled_at: None,
        };

        let json = serde_json::to_value(TopUpResponse::from(request)).unwrap();
        assert_eq!(json["amount"], "25.50");
        assert_eq!(json["amount_minor"], 2550);
        assert_eq!(json["reference"], "TU-ABC123");
        assert!(json.get("transaction_id").is_none());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client endpoints for Virtual IBAN accounts.
//!
//! Users only ever see their own accounts. A foreign account id answers 404,
//! the same as an unknown one.

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
    state::AppState,
    storage::{AccountRepository, StoredAccount, StoredTransaction, TransactionRepository},
    viban::{AccountService, VibanError},
};

/// Request a new Virtual IBAN.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RequestAccountRequest {
    /// ISO 4217 currency code, e.g. `EUR`.
    pub currency: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccountListResponse {
    pub accounts: Vec<StoredAccount>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionListResponse {
    pub transactions: Vec<StoredTransaction>,
    pub total: usize,
}

/// List the caller's Virtual IBAN accounts.
#[utoipa::path(
    get,
    path = "/v1/accounts",
    tag = "Accounts",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's accounts", body = AccountListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_my_accounts(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<AccountListResponse>, ApiError> {
    let accounts =
        AccountService::new(&state.ledger, state.partner.as_ref()).list_for_user(&user.user_id)?;
    let total = accounts.len();
    Ok(Json(AccountListResponse { accounts, total }))
}

/// Ask the banking partner for a new Virtual IBAN.
///
/// The account starts PENDING unless the partner opens it immediately.
#[utoipa::path(
    post,
    path = "/v1/accounts",
    tag = "Accounts",
    security(("bearer_auth" = [])),
    request_body = RequestAccountRequest,
    responses(
        (status = 201, description = "Account requested", body = StoredAccount),
        (status = 400, description = "Invalid currency"),
        (status = 409, description = "A live account already exists for this currency"),
        (status = 503, description = "Banking partner unavailable"),
        (status = 504, description = "Banking partner timed out")
    )
)]
pub async fn request_account(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<RequestAccountRequest>,
) -> Result<(StatusCode, Json<StoredAccount>), ApiError> {
    let account = AccountService::new(&state.ledger, state.partner.as_ref())
        .provision_account(&user.user_id, &request.currency, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// List the transactions booked on one of the caller's accounts.
#[utoipa::path(
    get,
    path = "/v1/accounts/{account_id}/transactions",
    tag = "Accounts",
    security(("bearer_auth" = [])),
    params(("account_id" = String, Path, description = "Virtual IBAN account id")),
    responses(
        (status = 200, description = "Transactions, newest first", body = TransactionListResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn list_account_transactions(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let account = AccountRepository::new(&state.ledger)
        .get(&account_id)?
        .filter(|a| a.owner_user_id == user.user_id || user.is_admin())
        .ok_or_else(|| VibanError::not_found("account", &account_id))?;

    let transactions = TransactionRepository::new(&state.ledger).list_by_account(&account.account_id)?;
    let total = transactions.len();
    Ok(Json(TransactionListResponse {
        transactions,
        total,
    }))
}

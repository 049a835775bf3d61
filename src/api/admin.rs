// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints for operating the reconciliation engine.
//!
//! These endpoints require the Admin role and provide:
//! - Account lifecycle (suspend, reactivate, close, sync)
//! - The manual review and payee verification queues
//! - Balance discrepancies
//! - Order registration, job triggers and audit log queries

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use super::accounts::TransactionListResponse;
use crate::{
    auth::AdminOnly,
    error::ApiError,
    jobs::{run_job, JobKind, JobReport},
    models::parse_amount_to_minor,
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, AuditRepository, DiscrepancyRepository, DiscrepancyStatus,
        ReviewNote, StoredAccount, StoredDiscrepancy, StoredOrder, StoredTransaction, TargetRef,
        TargetType, TransactionRepository,
    },
    viban::{
        audit_balance, register_order, resolve_discrepancy, AccountService, AccountSyncOutcome,
        BalanceAudit, NewOrder, ReconcileOutcome, Reconciler, VibanError, VopReview,
    },
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct SuspendAccountRequest {
    /// Shown to operators; kept on the account until reactivation.
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ManualReconcileRequest {
    pub target_type: TargetType,
    pub target_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveDiscrepancyRequest {
    pub note: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterOrderRequest {
    pub owner_user_id: String,
    pub payment_reference: String,
    /// Decimal amount, e.g. `"49.90"`.
    pub total_fiat: String,
    pub currency_code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DiscrepancyListResponse {
    pub discrepancies: Vec<StoredDiscrepancy>,
    pub total: usize,
}

/// What happened to a transaction after an approval.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReconcileResultResponse {
    /// `reconciled`, `sent_to_review` or `skipped`.
    pub outcome: String,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<StoredTransaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<ReviewNote>,
}

impl From<ReconcileOutcome> for ReconcileResultResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Reconciled {
                transaction,
                target,
            } => Self {
                outcome: "reconciled".to_string(),
                transaction_id: transaction.transaction_id.clone(),
                transaction: Some(transaction),
                target,
                note: None,
            },
            ReconcileOutcome::SentToReview { transaction, note } => Self {
                outcome: "sent_to_review".to_string(),
                transaction_id: transaction.transaction_id.clone(),
                transaction: Some(transaction),
                target: None,
                note: Some(note),
            },
            ReconcileOutcome::Skipped { transaction_id, .. } => Self {
                outcome: "skipped".to_string(),
                transaction_id,
                transaction: None,
                target: None,
                note: None,
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobRunResponse {
    pub triggered_by: String,
    /// Tagged by job name: `{"job": "...", "result": {...}}`.
    #[schema(value_type = Object)]
    pub report: JobReport,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DiscrepancyQueryParams {
    /// `OPEN` or `RESOLVED`; all when omitted.
    pub status: Option<DiscrepancyStatus>,
}

/// Query parameters for audit log queries.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// Filter by resource ID.
    pub resource_id: Option<String>,
    /// Maximum number of results (default 100, max 1000).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    pub events: Vec<AuditEvent>,
    pub total: usize,
}

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

fn accounts(state: &AppState) -> AccountService<'_> {
    AccountService::new(&state.ledger, state.partner.as_ref())
}

// ============================================================================
// Accounts
// ============================================================================

#[utoipa::path(
    post,
    path = "/v1/admin/accounts/{account_id}/suspend",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("account_id" = String, Path, description = "Virtual IBAN account id")),
    request_body = SuspendAccountRequest,
    responses(
        (status = 200, description = "Account suspended", body = StoredAccount),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Account is not active")
    )
)]
pub async fn suspend_account(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<SuspendAccountRequest>,
) -> Result<Json<StoredAccount>, ApiError> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::bad_request("reason must not be empty"));
    }
    let account = accounts(&state).suspend_account(&account_id, reason, &admin.user_id, Utc::now())?;
    Ok(Json(account))
}

#[utoipa::path(
    post,
    path = "/v1/admin/accounts/{account_id}/reactivate",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("account_id" = String, Path, description = "Virtual IBAN account id")),
    responses(
        (status = 200, description = "Account reactivated", body = StoredAccount),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Account is not suspended, or another account is active")
    )
)]
pub async fn reactivate_account(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<StoredAccount>, ApiError> {
    let account = accounts(&state).reactivate_account(&account_id, &admin.user_id, Utc::now())?;
    Ok(Json(account))
}

#[utoipa::path(
    post,
    path = "/v1/admin/accounts/{account_id}/close",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("account_id" = String, Path, description = "Virtual IBAN account id")),
    responses(
        (status = 200, description = "Account closed", body = StoredAccount),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Already closed or balance is not zero")
    )
)]
pub async fn close_account(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<StoredAccount>, ApiError> {
    let account = accounts(&state).close_account(&account_id, &admin.user_id, Utc::now())?;
    Ok(Json(account))
}

/// Pull status and balance from the banking partner.
#[utoipa::path(
    post,
    path = "/v1/admin/accounts/{account_id}/sync",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("account_id" = String, Path, description = "Virtual IBAN account id")),
    responses(
        (status = 200, description = "Account synced", body = AccountSyncOutcome),
        (status = 404, description = "Account not found"),
        (status = 503, description = "Banking partner unavailable"),
        (status = 504, description = "Banking partner timed out")
    )
)]
pub async fn sync_account(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountSyncOutcome>, ApiError> {
    let outcome = accounts(&state)
        .sync_account(&account_id, &admin.user_id, Utc::now())
        .await?;
    Ok(Json(outcome))
}

/// Recompute an account balance from its journal.
#[utoipa::path(
    get,
    path = "/v1/admin/accounts/{account_id}/balance-audit",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("account_id" = String, Path, description = "Virtual IBAN account id")),
    responses(
        (status = 200, description = "Stored vs. journal balance", body = BalanceAudit),
        (status = 404, description = "Account not found")
    )
)]
pub async fn balance_audit(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<BalanceAudit>, ApiError> {
    Ok(Json(audit_balance(&state.ledger, &account_id)?))
}

// ============================================================================
// Review queues
// ============================================================================

/// Transactions still PENDING or held, oldest first.
#[utoipa::path(
    get,
    path = "/v1/admin/transactions/unreconciled",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Manual review queue", body = TransactionListResponse),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_unreconciled(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let transactions = TransactionRepository::new(&state.ledger).list_unreconciled()?;
    let total = transactions.len();
    Ok(Json(TransactionListResponse {
        transactions,
        total,
    }))
}

/// Link a credit to a chosen order or top-up request.
#[utoipa::path(
    post,
    path = "/v1/admin/transactions/{transaction_id}/reconcile",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("transaction_id" = String, Path, description = "Internal transaction id")),
    request_body = ManualReconcileRequest,
    responses(
        (status = 200, description = "Transaction reconciled", body = StoredTransaction),
        (status = 404, description = "Transaction or target not found"),
        (status = 409, description = "Already reconciled, or not in a reconcilable state"),
        (status = 422, description = "Target does not match the transaction")
    )
)]
pub async fn manual_reconcile(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(request): Json<ManualReconcileRequest>,
) -> Result<Json<StoredTransaction>, ApiError> {
    let target = TargetRef {
        target_type: request.target_type,
        target_id: request.target_id,
    };
    let tx = Reconciler::new(&state.ledger, &state.reconciliation).manual_reconcile(
        &transaction_id,
        &target,
        &admin.user_id,
        Utc::now(),
    )?;
    Ok(Json(tx))
}

/// Transactions held for payee verification review.
#[utoipa::path(
    get,
    path = "/v1/admin/vop",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "VOP review queue", body = TransactionListResponse)
    )
)]
pub async fn list_vop_queue(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let transactions = TransactionRepository::new(&state.ledger).list_vop_queue()?;
    let total = transactions.len();
    Ok(Json(TransactionListResponse {
        transactions,
        total,
    }))
}

/// Approve a held transaction and reconcile it immediately.
#[utoipa::path(
    post,
    path = "/v1/admin/transactions/{transaction_id}/vop/approve",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("transaction_id" = String, Path, description = "Internal transaction id")),
    responses(
        (status = 200, description = "Hold released", body = ReconcileResultResponse),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "Already reviewed or not held")
    )
)]
pub async fn approve_vop(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<ReconcileResultResponse>, ApiError> {
    let outcome = VopReview::new(&state.ledger, &state.reconciliation).approve(
        &transaction_id,
        &admin.user_id,
        Utc::now(),
    )?;
    Ok(Json(outcome.into()))
}

#[utoipa::path(
    post,
    path = "/v1/admin/transactions/{transaction_id}/vop/reject",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("transaction_id" = String, Path, description = "Internal transaction id")),
    responses(
        (status = 200, description = "Transaction failed", body = StoredTransaction),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "Already reviewed or not held")
    )
)]
pub async fn reject_vop(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<StoredTransaction>, ApiError> {
    let tx = VopReview::new(&state.ledger, &state.reconciliation).reject(
        &transaction_id,
        &admin.user_id,
        Utc::now(),
    )?;
    Ok(Json(tx))
}

// ============================================================================
// Discrepancies
// ============================================================================

#[utoipa::path(
    get,
    path = "/v1/admin/discrepancies",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(DiscrepancyQueryParams),
    responses(
        (status = 200, description = "Balance discrepancies, newest first", body = DiscrepancyListResponse)
    )
)]
pub async fn list_discrepancies(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Query(params): Query<DiscrepancyQueryParams>,
) -> Result<Json<DiscrepancyListResponse>, ApiError> {
    let discrepancies = DiscrepancyRepository::new(&state.ledger).list(params.status)?;
    let total = discrepancies.len();
    Ok(Json(DiscrepancyListResponse {
        discrepancies,
        total,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/discrepancies/{discrepancy_id}/resolve",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("discrepancy_id" = String, Path, description = "Discrepancy id")),
    request_body = ResolveDiscrepancyRequest,
    responses(
        (status = 200, description = "Discrepancy resolved", body = StoredDiscrepancy),
        (status = 404, description = "Discrepancy not found"),
        (status = 409, description = "Already resolved")
    )
)]
pub async fn resolve(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(discrepancy_id): Path<String>,
    Json(request): Json<ResolveDiscrepancyRequest>,
) -> Result<Json<StoredDiscrepancy>, ApiError> {
    let note = request.note.trim();
    if note.is_empty() {
        return Err(ApiError::bad_request("note must not be empty"));
    }
    let resolved = resolve_discrepancy(&state.ledger, &discrepancy_id, &admin.user_id, note, Utc::now())?;
    Ok(Json(resolved))
}

// ============================================================================
// Orders, jobs and audit
// ============================================================================

/// Announce an order that will be paid by bank transfer.
#[utoipa::path(
    post,
    path = "/v1/admin/orders",
    tag = "Admin",
    security(("bearer_auth" = [])),
    request_body = RegisterOrderRequest,
    responses(
        (status = 201, description = "Order registered", body = StoredOrder),
        (status = 400, description = "Invalid amount, currency or reference"),
        (status = 409, description = "Payment reference already in use")
    )
)]
pub async fn create_order(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<RegisterOrderRequest>,
) -> Result<(StatusCode, Json<StoredOrder>), ApiError> {
    let total_fiat_minor = parse_amount_to_minor(&request.total_fiat).map_err(VibanError::from)?;
    let order = register_order(
        &state.ledger,
        NewOrder {
            owner_user_id: request.owner_user_id,
            payment_reference: request.payment_reference,
            total_fiat_minor,
            currency_code: request.currency_code,
        },
        &admin.user_id,
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Run a background job now and return its report.
#[utoipa::path(
    post,
    path = "/v1/admin/jobs/{job}",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("job" = String, Path, description = "payment-sync, reconciliation, balance-validation or topup-expiry")),
    responses(
        (status = 200, description = "Job report", body = JobRunResponse),
        (status = 404, description = "Unknown job")
    )
)]
pub async fn trigger_job(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<JobRunResponse>, ApiError> {
    let kind: JobKind = job
        .parse()
        .map_err(|e: crate::jobs::UnknownJob| ApiError::not_found(e.to_string()))?;

    AuditRepository::new(&state.ledger).log(
        &AuditEvent::new(AuditEventType::JobTriggered)
            .with_actor(&admin.user_id)
            .with_details(json!({ "job": kind.as_str() })),
    )?;

    let report = run_job(&state, kind).await?;
    Ok(Json(JobRunResponse {
        triggered_by: admin.user_id,
        report,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/admin/audit/events",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(AuditQueryParams),
    responses(
        (status = 200, description = "Audit events, oldest first", body = AuditLogResponse),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn query_audit_logs(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let repo = AuditRepository::new(&state.ledger);
    let limit = params.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);

    let events = match params.resource_id.as_deref() {
        Some(resource_id) => {
            let events = repo.search_by_resource(resource_id)?;
            let skip = events.len().saturating_sub(limit);
            events.into_iter().skip(skip).collect()
        }
        None => repo.recent(limit)?,
    };
    let total = events.len();
    Ok(Json(AuditLogResponse { events, total }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TxStatus;

    #[test]
    fn audit_query_params_deserializes() {
        let params: AuditQueryParams =
            serde_json::from_str(r#"{"resource_id": "tx-1", "limit": 50}"#).unwrap();
        assert_eq!(params.resource_id.as_deref(), Some("tx-1"));
        assert_eq!(params.limit, Some(50));
    }

    #[test]
    fn discrepancy_filter_uses_wire_names() {
        let params: DiscrepancyQueryParams = serde_json::from_str(r#"{"status": "OPEN"}"#).unwrap();
        assert_eq!(params.status, Some(DiscrepancyStatus::Open));
    }

    #[test]
    fn manual_reconcile_request_accepts_snake_case_target() {
        let request: ManualReconcileRequest =
            serde_json::from_str(r#"{"target_type": "top_up_request", "target_id": "r1"}"#).unwrap();
        assert_eq!(request.target_type, TargetType::TopUpRequest);
    }

    #[test]
    fn skipped_outcome_has_no_transaction_body() {
        let response: ReconcileResultResponse = ReconcileOutcome::Skipped {
            transaction_id: "tx-1".to_string(),
            status: TxStatus::Failed,
        }
        .into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["transaction_id"], "tx-1");
        assert!(json.get("transaction").is_none());
    }
}

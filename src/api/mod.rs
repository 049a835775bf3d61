// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    state::AppState,
    storage::{
        AccountStatus, AuditEvent, AuditEventType, BalanceEntryKind, CurrencyBalanceCheck,
        CurrencyCheckStatus, Direction, DiscrepancyStatus, OrderStatus, ReconciledBy, ReviewNote,
        StoredAccount, StoredDiscrepancy, StoredOrder, StoredTopUp, StoredTransaction, TargetRef,
        TargetType, TopUpStatus, TxStatus, VopStatus,
    },
    viban::{AccountSyncOutcome, BalanceAudit},
};

pub mod accounts;
pub mod admin;
pub mod health;
pub mod topups;
pub mod webhooks;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        // Client
        .route(
            "/accounts",
            get(accounts::list_my_accounts).post(accounts::request_account),
        )
        .route(
            "/accounts/{account_id}/transactions",
            get(accounts::list_account_transactions),
        )
        .route("/topups", get(topups::list_topups).post(topups::create_topup))
        .route("/topups/{request_id}/cancel", post(topups::cancel_topup))
        // Admin
        .route(
            "/admin/accounts/{account_id}/suspend",
            post(admin::suspend_account),
        )
        .route(
            "/admin/accounts/{account_id}/reactivate",
            post(admin::reactivate_account),
        )
        .route("/admin/accounts/{account_id}/close", post(admin::close_account))
        .route("/admin/accounts/{account_id}/sync", post(admin::sync_account))
        .route(
            "/admin/accounts/{account_id}/balance-audit",
            get(admin::balance_audit),
        )
        .route(
            "/admin/transactions/unreconciled",
            get(admin::list_unreconciled),
        )
        .route(
            "/admin/transactions/{transaction_id}/reconcile",
            post(admin::manual_reconcile),
        )
        .route("/admin/vop", get(admin::list_vop_queue))
        .route(
            "/admin/transactions/{transaction_id}/vop/approve",
            post(admin::approve_vop),
        )
        .route(
            "/admin/transactions/{transaction_id}/vop/reject",
            post(admin::reject_vop),
        )
        .route("/admin/discrepancies", get(admin::list_discrepancies))
        .route(
            "/admin/discrepancies/{discrepancy_id}/resolve",
            post(admin::resolve),
        )
        .route("/admin/orders", post(admin::create_order))
        .route("/admin/jobs/{job}", post(admin::trigger_job))
        .route("/admin/audit/events", get(admin::query_audit_logs))
        // Partner
        .route("/webhooks/partner", post(webhooks::receive_partner_event));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        accounts::list_my_accounts,
        accounts::request_account,
        accounts::list_account_transactions,
        topups::list_topups,
        topups::create_topup,
        topups::cancel_topup,
        admin::suspend_account,
        admin::reactivate_account,
        admin::close_account,
        admin::sync_account,
        admin::balance_audit,
        admin::list_unreconciled,
        admin::manual_reconcile,
        admin::list_vop_queue,
        admin::approve_vop,
        admin::reject_vop,
        admin::list_discrepancies,
        admin::resolve,
        admin::create_order,
        admin::trigger_job,
        admin::query_audit_logs,
        webhooks::receive_partner_event
    ),
    components(
        schemas(
            StoredAccount,
            AccountStatus,
            StoredTransaction,
            TxStatus,
            Direction,
            VopStatus,
            TargetType,
            TargetRef,
            ReconciledBy,
            ReviewNote,
            StoredTopUp,
            TopUpStatus,
            StoredOrder,
            OrderStatus,
            StoredDiscrepancy,
            DiscrepancyStatus,
            CurrencyBalanceCheck,
            CurrencyCheckStatus,
            BalanceEntryKind,
            AuditEvent,
            AuditEventType,
            AccountSyncOutcome,
            BalanceAudit,
            accounts::RequestAccountRequest,
            accounts::AccountListResponse,
            accounts::TransactionListResponse,
            topups::CreateTopUpRequest,
            topups::TopUpResponse,
            topups::TopUpListResponse,
            admin::SuspendAccountRequest,
            admin::ManualReconcileRequest,
            admin::ResolveDiscrepancyRequest,
            admin::RegisterOrderRequest,
            admin::DiscrepancyListResponse,
            admin::ReconcileResultResponse,
            admin::JobRunResponse,
            admin::AuditLogResponse,
            webhooks::WebhookAck,
            health::ReadyResponse,
            health::HealthResponse
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Accounts", description = "Virtual IBAN accounts and their transactions"),
        (name = "TopUps", description = "Top-up requests and payment references"),
        (name = "Admin", description = "Review queues, account lifecycle and jobs"),
        (name = "Webhooks", description = "Banking partner deliveries")
    )
)]
struct ApiDoc;

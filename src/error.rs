// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::providers::PartnerError;
use crate::storage::LedgerError;
use crate::viban::VibanError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<VibanError> for ApiError {
    fn from(error: VibanError) -> Self {
        let message = error.to_string();
        let (status, code) = match &error {
            VibanError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
            VibanError::InvalidCurrency(_) => (StatusCode::BAD_REQUEST, "invalid_currency"),
            VibanError::InvalidReference(_) => (StatusCode::BAD_REQUEST, "invalid_reference"),
            VibanError::AccountNotEligible { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "account_not_eligible")
            }
            VibanError::Mismatch(_) => (StatusCode::UNPROCESSABLE_ENTITY, "mismatch"),
            VibanError::UnknownAccount(_) => (StatusCode::UNPROCESSABLE_ENTITY, "unknown_account"),
            VibanError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            VibanError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            VibanError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            VibanError::AlreadyProcessed { .. } => (StatusCode::CONFLICT, "already_processed"),
            VibanError::AlreadyReviewed(_) => (StatusCode::CONFLICT, "already_reviewed"),
            VibanError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            VibanError::Partner(e) if e.is_timeout() => {
                (StatusCode::GATEWAY_TIMEOUT, "partner_timeout")
            }
            VibanError::Partner(PartnerError::MissingConfig(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "partner_not_configured")
            }
            VibanError::Partner(_) => (StatusCode::SERVICE_UNAVAILABLE, "partner_unavailable"),
            VibanError::RandomUnavailable | VibanError::Ledger(_) => {
                tracing::error!(error = %error, "Internal error");
                return Self::internal("internal error");
            }
        };
        Self::new(status, code, message)
    }
}

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        VibanError::Ledger(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn concurrency_conflicts_map_to_409_with_codes() {
        let processed: ApiError = VibanError::already_processed("top_up_request", "r1").into();
        assert_eq!(processed.status, StatusCode::CONFLICT);
        assert_eq!(processed.code, "already_processed");

        let reviewed: ApiError = VibanError::AlreadyReviewed("t1".to_string()).into();
        assert_eq!(reviewed.code, "already_reviewed");

        let state: ApiError = VibanError::InvalidState("nope".to_string()).into();
        assert_eq!(state.status, StatusCode::CONFLICT);
        assert_eq!(state.code, "invalid_state");
    }

    #[test]
    fn validation_errors_map_to_client_statuses() {
        let amount: ApiError = VibanError::InvalidAmount("zero".to_string()).into();
        assert_eq!(amount.status, StatusCode::BAD_REQUEST);

        let eligible: ApiError = VibanError::AccountNotEligible {
            account_id: "a1".to_string(),
            status: "SUSPENDED".to_string(),
        }
        .into();
        assert_eq!(eligible.status, StatusCode::UNPROCESSABLE_ENTITY);

        let missing: ApiError = VibanError::not_found("account", "a1").into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn partner_timeout_is_distinct_from_outage() {
        let timeout: ApiError = VibanError::Partner(PartnerError::Timeout("15s".to_string())).into();
        assert_eq!(timeout.status, StatusCode::GATEWAY_TIMEOUT);

        let down: ApiError =
            VibanError::Partner(PartnerError::Unavailable("502".to_string())).into();
        assert_eq!(down.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data","code":"bad_request"}"#);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Top-up request lifecycle.
//!
//! ```text
//! PENDING ──match──▶ COMPLETED
//!    │ ────expiry───▶ EXPIRED
//!    └────cancel───▶ CANCELLED
//! ```
//!
//! Every exit from PENDING re-reads the request inside its write transaction
//! and only proceeds while it is still PENDING. Whichever writer commits
//! first wins; the others observe the new status and back off.

use chrono::{DateTime, Utc};
use ring::rand::SystemRandom;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::error::{VibanError, VibanResult};
use super::reference::{generate_reference, normalize_reference};
use crate::config::ReconciliationSettings;
use crate::models::normalize_currency;
use crate::storage::{
    AccountStatus, AuditEvent, AuditEventType, LedgerDb, LedgerRead, LedgerWrite, StoredAccount,
    StoredTopUp, TopUpRepository, TopUpStatus, ORDER_BY_REFERENCE, PENDING_TOPUP_BY_ACCOUNT,
    TOPUP_BY_REFERENCE,
};

const MAX_REFERENCE_ATTEMPTS: usize = 8;

/// Counts from one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ExpirySummary {
    /// Overdue PENDING requests found by the scan.
    pub examined: usize,
    pub expired: usize,
    /// Requests that left PENDING between the scan and their write.
    pub skipped: usize,
    pub failed: usize,
}

pub struct TopUpManager<'a> {
    db: &'a LedgerDb,
    settings: &'a ReconciliationSettings,
    rng: SystemRandom,
}

impl<'a> TopUpManager<'a> {
    pub fn new(db: &'a LedgerDb, settings: &'a ReconciliationSettings) -> Self {
        Self {
            db,
            settings,
            rng: SystemRandom::new(),
        }
    }

    pub fn list_for_user(&self, user_id: &str) -> VibanResult<Vec<StoredTopUp>> {
        Ok(TopUpRepository::new(self.db).list_by_owner(user_id)?)
    }

    /// Open a PENDING request with a fresh unique reference.
    pub fn create_request(
        &self,
        user_id: &str,
        virtual_iban_id: &str,
        amount_minor: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredTopUp> {
        if amount_minor <= 0 {
            return Err(VibanError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        let currency = normalize_currency(currency)?;

        let request = self.db.write(|txn| {
            let account: StoredAccount = txn
                .load(virtual_iban_id)?
                .ok_or_else(|| VibanError::not_found("account", virtual_iban_id))?;
            if account.owner_user_id != user_id {
                return Err(VibanError::not_found("account", virtual_iban_id));
            }
            if account.status != AccountStatus::Active {
                return Err(VibanError::AccountNotEligible {
                    account_id: account.account_id.clone(),
                    status: account.status.as_str().to_string(),
                });
            }
            if account.currency != currency {
                return Err(VibanError::Mismatch(format!(
                    "account {} holds {}, not {currency}",
                    account.account_id, account.currency
                )));
            }

            let (reference, normalized) = self.unique_reference(txn)?;
            let request = StoredTopUp {
                request_id: uuid::Uuid::new_v4().to_string(),
                virtual_iban_id: account.account_id.clone(),
                owner_user_id: user_id.to_string(),
                amount_minor,
                currency: currency.clone(),
                reference,
                normalized_reference: normalized,
                status: TopUpStatus::Pending,
                created_at: now,
                expires_at: now + self.settings.topup_ttl,
                updated_at: now,
                transaction_id: None,
                completed_at: None,
                expired_at: None,
                cancelled_at: None,
            };
            txn.store(&request)?;
            txn.link(
                TOPUP_BY_REFERENCE,
                &request.normalized_reference,
                &request.request_id,
            )?;
            txn.link(
                PENDING_TOPUP_BY_ACCOUNT,
                &request.pending_key(),
                &request.request_id,
            )?;

            AuditEvent::new(AuditEventType::TopUpCreated)
                .with_actor(user_id)
                .with_resource("top_up_request", &request.request_id)
                .with_details(json!({
                    "account_id": request.virtual_iban_id,
                    "amount_minor": amount_minor,
                    "currency": request.currency,
                    "reference": request.reference,
                }))
                .at(now)
                .record(txn)?;
            Ok(request)
        })?;

        info!(
            request_id = %request.request_id,
            account_id = %request.virtual_iban_id,
            amount_minor,
            reference = %request.reference,
            "Top-up request created"
        );
        Ok(request)
    }

    /// Draw references until one is unused by any top-up or order.
    fn unique_reference(&self, txn: &impl LedgerRead) -> VibanResult<(String, String)> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let reference = generate_reference(&self.rng)?;
            let normalized = normalize_reference(&reference);
            if txn.lookup(TOPUP_BY_REFERENCE, &normalized)?.is_none()
                && txn.lookup(ORDER_BY_REFERENCE, &normalized)?.is_none()
            {
                return Ok((reference, normalized));
            }
            warn!(reference = %reference, "Generated reference collided, retrying");
        }
        Err(VibanError::Conflict(
            "could not allocate a unique payment reference".to_string(),
        ))
    }

    /// Cancel a PENDING request on behalf of its owner.
    pub fn cancel_request(
        &self,
        request_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredTopUp> {
        let request = self.db.write(|txn| {
            let mut request: StoredTopUp = txn
                .load(request_id)?
                .ok_or_else(|| VibanError::not_found("top_up_request", request_id))?;
            if request.owner_user_id != user_id {
                return Err(VibanError::not_found("top_up_request", request_id));
            }
            if request.status != TopUpStatus::Pending {
                return Err(VibanError::InvalidState(format!(
                    "top-up request {request_id} is {}",
                    request.status.as_str()
                )));
            }

            request.status = TopUpStatus::Cancelled;
            request.cancelled_at = Some(now);
            request.updated_at = now;
            txn.store(&request)?;
            txn.unlink(PENDING_TOPUP_BY_ACCOUNT, &request.pending_key())?;

            AuditEvent::new(AuditEventType::TopUpCancelled)
                .with_actor(user_id)
                .with_resource("top_up_request", request_id)
                .at(now)
                .record(txn)?;
            Ok(request)
        })?;

        info!(request_id, user_id, "Top-up request cancelled");
        Ok(request)
    }

    /// Expire every PENDING request whose deadline passed before `now`.
    ///
    /// Each request is expired in its own write transaction, conditional on
    /// it still being PENDING and overdue, so re-running the sweep or racing
    /// a match never double-applies a transition.
    pub fn expire_old_requests(&self, now: DateTime<Utc>) -> VibanResult<ExpirySummary> {
        let overdue = TopUpRepository::new(self.db).list_overdue(now)?;
        let mut summary = ExpirySummary {
            examined: overdue.len(),
            ..ExpirySummary::default()
        };

        for candidate in overdue {
            match self.expire_one(&candidate.request_id, now) {
                Ok(true) => summary.expired += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        request_id = %candidate.request_id,
                        error = %e,
                        "Failed to expire top-up request"
                    );
                }
            }
        }

        if summary.examined > 0 {
            info!(
                expired = summary.expired,
                skipped = summary.skipped,
                failed = summary.failed,
                "Top-up expiry sweep finished"
            );
        }
        Ok(summary)
    }

    fn expire_one(&self, request_id: &str, now: DateTime<Utc>) -> VibanResult<bool> {
        self.db.write(|txn| {
            let Some(mut request) = txn.load::<StoredTopUp>(request_id)? else {
                return Ok(false);
            };
            if request.status != TopUpStatus::Pending || request.expires_at >= now {
                return Ok(false);
            }

            request.status = TopUpStatus::Expired;
            request.expired_at = Some(now);
            request.updated_at = now;
            txn.store(&request)?;
            txn.unlink(PENDING_TOPUP_BY_ACCOUNT, &request.pending_key())?;

            AuditEvent::new(AuditEventType::TopUpExpired)
                .with_actor("expiry-sweep")
                .with_resource("top_up_request", request_id)
                .at(now)
                .record(txn)?;
            Ok::<_, VibanError>(true)
        })
    }
}

/// Move a PENDING request to COMPLETED and link the paying transaction.
///
/// Runs inside the reconciliation write transaction. Fails with
/// `AlreadyProcessed` when the request already left PENDING.
pub(crate) fn complete_request(
    txn: &impl LedgerWrite,
    request_id: &str,
    transaction_id: &str,
    now: DateTime<Utc>,
) -> VibanResult<StoredTopUp> {
    let mut request: StoredTopUp = txn
        .load(request_id)?
        .ok_or_else(|| VibanError::not_found("top_up_request", request_id))?;
    if request.status != TopUpStatus::Pending {
        return Err(VibanError::already_processed("top_up_request", request_id));
    }

    request.status = TopUpStatus::Completed;
    request.transaction_id = Some(transaction_id.to_string());
    request.completed_at = Some(now);
    request.updated_at = now;
    txn.store(&request)?;
    txn.unlink(PENDING_TOPUP_BY_ACCOUNT, &request.pending_key())?;

    AuditEvent::new(AuditEventType::TopUpCompleted)
        .with_actor("reconciliation")
        .with_resource("top_up_request", request_id)
        .with_details(json!({ "transaction_id": transaction_id }))
        .at(now)
        .record(txn)?;
    Ok(request)
}

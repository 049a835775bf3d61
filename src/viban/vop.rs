// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verification-of-payee review.
//!
//! Credits whose payee check came back as anything but a full match are held
//! until an administrator decides. Approval releases the transaction to the
//! reconciler; rejection fails it without touching the balance.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use super::error::{VibanError, VibanResult};
use super::reconcile::{ReconcileOutcome, Reconciler};
use crate::config::ReconciliationSettings;
use crate::storage::{
    AuditEvent, AuditEventType, LedgerDb, LedgerRead, LedgerWrite, StoredTransaction, TxStatus,
};

pub struct VopReview<'a> {
    db: &'a LedgerDb,
    settings: &'a ReconciliationSettings,
}

impl<'a> VopReview<'a> {
    pub fn new(db: &'a LedgerDb, settings: &'a ReconciliationSettings) -> Self {
        Self { db, settings }
    }

    /// Release a held transaction and attempt reconciliation straight away.
    pub fn approve(
        &self,
        transaction_id: &str,
        admin_user_id: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<ReconcileOutcome> {
        self.decide(transaction_id, admin_user_id, true, now)?;
        info!(transaction_id, admin_user_id, "VOP hold approved");
        Reconciler::new(self.db, self.settings).reconcile_transaction(transaction_id, now)
    }

    /// Fail a held transaction. The funds stay unapplied.
    pub fn reject(
        &self,
        transaction_id: &str,
        admin_user_id: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredTransaction> {
        let tx = self.decide(transaction_id, admin_user_id, false, now)?;
        info!(transaction_id, admin_user_id, "VOP hold rejected");
        Ok(tx)
    }

    fn decide(
        &self,
        transaction_id: &str,
        admin_user_id: &str,
        approved: bool,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredTransaction> {
        self.db.write(|txn| {
            let mut tx: StoredTransaction = txn
                .load(transaction_id)?
                .ok_or_else(|| VibanError::not_found("transaction", transaction_id))?;
            if tx.vop_approved.is_some() {
                return Err(VibanError::AlreadyReviewed(transaction_id.to_string()));
            }
            if tx.status != TxStatus::VopHeld {
                return Err(VibanError::InvalidState(format!(
                    "transaction {transaction_id} is not held for payee verification"
                )));
            }

            tx.vop_approved = Some(approved);
            tx.vop_reviewed_by = Some(admin_user_id.to_string());
            tx.vop_reviewed_at = Some(now);
            tx.updated_at = now;
            let event_type = if approved {
                AuditEventType::VopApproved
            } else {
                tx.status = TxStatus::Failed;
                tx.review_note = None;
                AuditEventType::VopRejected
            };
            txn.store(&tx)?;

            AuditEvent::new(event_type)
                .with_actor(admin_user_id)
                .with_resource("transaction", &tx.transaction_id)
                .with_details(json!({
                    "vop_status": tx.vop_status,
                    "amount_minor": tx.amount_minor,
                }))
                .at(now)
                .record(txn)?;
            Ok(tx)
        })
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Idempotent transaction ingestion.
//!
//! Webhook deliveries and the payment poller both call
//! [`ingest_transaction`]. The partner's transaction id is the upsert key:
//! a second delivery of the same id never creates a second row.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use super::error::{VibanError, VibanResult};
use crate::models::normalize_currency;
use crate::providers::PartnerTransaction;
use crate::storage::{
    AuditEvent, AuditEventType, LedgerDb, LedgerRead, LedgerWrite, ReviewNote, StoredAccount,
    StoredTransaction, TxStatus, ACCOUNT_BY_PROVIDER_REF, TRANSACTION_BY_EXTERNAL_ID,
};

/// What ingestion did with a partner transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// First sighting; a new row was written.
    New(StoredTransaction),
    /// Already ingested; the stored row is returned.
    AlreadyKnown(StoredTransaction),
}

impl IngestOutcome {
    pub fn transaction(&self) -> &StoredTransaction {
        match self {
            IngestOutcome::New(tx) | IngestOutcome::AlreadyKnown(tx) => tx,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, IngestOutcome::New(_))
    }
}

/// Upsert a partner transaction keyed on its external id.
///
/// A repeat delivery only ever adds a payee-verification flag that an earlier
/// delivery lacked, and only while the transaction is still PENDING.
pub fn ingest_transaction(
    db: &LedgerDb,
    incoming: &PartnerTransaction,
    now: DateTime<Utc>,
) -> VibanResult<IngestOutcome> {
    if incoming.amount_minor <= 0 {
        return Err(VibanError::InvalidAmount(format!(
            "transaction {} has non-positive amount {}",
            incoming.external_transaction_id, incoming.amount_minor
        )));
    }
    let currency = normalize_currency(&incoming.currency)?;

    let outcome = db.write(|txn| {
        if let Some(mut existing) = txn.load_by_index::<StoredTransaction>(
            TRANSACTION_BY_EXTERNAL_ID,
            &incoming.external_transaction_id,
        )? {
            if let Some(vop) = incoming.vop_status {
                if existing.status == TxStatus::Pending
                    && existing.vop_status.is_none()
                    && vop.requires_review()
                {
                    existing.vop_status = Some(vop);
                    existing.status = TxStatus::VopHeld;
                    existing.review_note = Some(ReviewNote::AwaitingVopReview);
                    existing.updated_at = now;
                    txn.store(&existing)?;
                    vop_held_event(&existing, now).record(txn)?;
                }
            }
            return Ok(IngestOutcome::AlreadyKnown(existing));
        }

        let account: StoredAccount = txn
            .load_by_index(ACCOUNT_BY_PROVIDER_REF, &incoming.provider_account_id)?
            .ok_or_else(|| VibanError::UnknownAccount(incoming.provider_account_id.clone()))?;

        let held = incoming.vop_status.is_some_and(|v| v.requires_review());
        let transaction = StoredTransaction {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            external_transaction_id: incoming.external_transaction_id.clone(),
            virtual_iban_id: account.account_id.clone(),
            amount_minor: incoming.amount_minor,
            currency,
            direction: incoming.direction,
            external_reference: incoming.reference.clone(),
            external_correlation_id: incoming.correlation_id.clone(),
            counterparty_name: incoming.counterparty_name.clone(),
            counterparty_iban: incoming.counterparty_iban.clone(),
            status: if held { TxStatus::VopHeld } else { TxStatus::Pending },
            vop_status: incoming.vop_status,
            vop_approved: None,
            vop_reviewed_by: None,
            vop_reviewed_at: None,
            reconciled_order_id: None,
            reconciled_top_up_request_id: None,
            reconciled_by: None,
            reconciled_at: None,
            review_note: held.then_some(ReviewNote::AwaitingVopReview),
            last_attempt_at: None,
            booked_at: incoming.booked_at,
            ingested_at: now,
            updated_at: now,
        };

        txn.store(&transaction)?;
        txn.link(
            TRANSACTION_BY_EXTERNAL_ID,
            &transaction.external_transaction_id,
            &transaction.transaction_id,
        )?;

        AuditEvent::new(AuditEventType::TransactionIngested)
            .with_actor("ingestion")
            .with_resource("transaction", &transaction.transaction_id)
            .with_details(json!({
                "external_transaction_id": transaction.external_transaction_id,
                "account_id": transaction.virtual_iban_id,
                "amount_minor": transaction.amount_minor,
                "currency": transaction.currency,
                "direction": transaction.direction,
            }))
            .at(now)
            .record(txn)?;
        if held {
            vop_held_event(&transaction, now).record(txn)?;
        }

        Ok::<_, VibanError>(IngestOutcome::New(transaction))
    })?;

    match &outcome {
        IngestOutcome::New(tx) => info!(
            transaction_id = %tx.transaction_id,
            external_transaction_id = %tx.external_transaction_id,
            account_id = %tx.virtual_iban_id,
            amount_minor = tx.amount_minor,
            status = ?tx.status,
            "Transaction ingested"
        ),
        IngestOutcome::AlreadyKnown(tx) => tracing::debug!(
            transaction_id = %tx.transaction_id,
            external_transaction_id = %tx.external_transaction_id,
            "Transaction already ingested"
        ),
    }
    Ok(outcome)
}

fn vop_held_event(tx: &StoredTransaction, now: DateTime<Utc>) -> AuditEvent {
    AuditEvent::new(AuditEventType::VopHeld)
        .with_actor("ingestion")
        .with_resource("transaction", &tx.transaction_id)
        .with_details(json!({ "vop_status": tx.vop_status }))
        .at(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{TransactionRepository, VopStatus};
    use crate::testing::{active_account, credit, TestLedger};

    #[test]
    fn same_external_id_is_stored_once() {
        let ledger = TestLedger::new();
        active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let now = Utc::now();
        let incoming = credit("ext-1", "prov-1", 10_000, now);

        let first = ingest_transaction(&ledger.db, &incoming, now).unwrap();
        let second = ingest_transaction(&ledger.db, &incoming, now).unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(
            first.transaction().transaction_id,
            second.transaction().transaction_id
        );
        let all: Vec<StoredTransaction> = ledger.db.read(|txn| txn.load_all()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn flagged_payee_is_held() {
        let ledger = TestLedger::new();
        active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let mut incoming = credit("ext-1", "prov-1", 10_000, Utc::now());
        incoming.vop_status = Some(VopStatus::CloseMatch);

        let outcome = ingest_transaction(&ledger.db, &incoming, Utc::now()).unwrap();
        let tx = outcome.transaction();
        assert_eq!(tx.status, TxStatus::VopHeld);
        assert_eq!(tx.review_note, Some(ReviewNote::AwaitingVopReview));
        assert!(tx.vop_approved.is_none());

        let queue = TransactionRepository::new(&ledger.db).list_vop_queue().unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn matched_payee_is_not_held() {
        let ledger = TestLedger::new();
        active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let mut incoming = credit("ext-1", "prov-1", 10_000, Utc::now());
        incoming.vop_status = Some(VopStatus::Match);

        let outcome = ingest_transaction(&ledger.db, &incoming, Utc::now()).unwrap();
        assert_eq!(outcome.transaction().status, TxStatus::Pending);
    }

    #[test]
    fn late_vop_flag_holds_pending_transaction() {
        let ledger = TestLedger::new();
        active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let now = Utc::now();
        let mut incoming = credit("ext-1", "prov-1", 10_000, now);
        ingest_transaction(&ledger.db, &incoming, now).unwrap();

        incoming.vop_status = Some(VopStatus::NoMatch);
        let outcome = ingest_transaction(&ledger.db, &incoming, now).unwrap();
        assert!(!outcome.is_new());
        assert_eq!(outcome.transaction().status, TxStatus::VopHeld);
        assert_eq!(outcome.transaction().vop_status, Some(VopStatus::NoMatch));
    }

    #[test]
    fn unknown_account_is_rejected() {
        let ledger = TestLedger::new();
        let incoming = credit("ext-1", "prov-missing", 10_000, Utc::now());
        let result = ingest_transaction(&ledger.db, &incoming, Utc::now());
        assert!(matches!(result, Err(VibanError::UnknownAccount(r)) if r == "prov-missing"));
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let ledger = TestLedger::new();
        active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let incoming = credit("ext-1", "prov-1", 0, Utc::now());
        let result = ingest_transaction(&ledger.db, &incoming, Utc::now());
        assert!(matches!(result, Err(VibanError::InvalidAmount(_))));
    }
}

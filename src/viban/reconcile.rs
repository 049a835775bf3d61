// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reconciliation engine.
//!
//! Resolves ingested transactions against top-up requests and orders. A
//! successful resolution marks the transaction RECONCILED, completes or pays
//! the target, credits the account, and appends audit events, all in one
//! write transaction. Running it again on a RECONCILED transaction is a
//! no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::balance::apply_balance_change;
use super::error::{VibanError, VibanResult};
use super::ingest::{ingest_transaction, IngestOutcome};
use super::matcher::{check_order, check_top_up, find_match, MatchOutcome, MatchTarget};
use super::topups::complete_request;
use crate::config::ReconciliationSettings;
use crate::providers::PartnerTransaction;
use crate::storage::{
    AccountStatus, AuditEvent, AuditEventType, BalanceEntryKind, Direction, LedgerDb, LedgerRead,
    LedgerWrite, OrderStatus, ReconciledBy, ReviewNote, StoredAccount, StoredOrder, StoredPayIn,
    StoredTopUp, StoredTransaction, TargetRef, TargetType, TransactionRepository, TxStatus,
    AWAITING_ORDER_BY_OWNER,
};

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Linked to a target (or applied as an outflow when `target` is `None`).
    Reconciled {
        transaction: StoredTransaction,
        target: Option<TargetRef>,
    },
    /// Left unreconciled with an explanation for the review queue.
    SentToReview {
        transaction: StoredTransaction,
        note: ReviewNote,
    },
    /// Not eligible right now (already terminal, or awaiting VOP review).
    Skipped {
        transaction_id: String,
        status: TxStatus,
    },
}

/// Counts from one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepSummary {
    pub examined: usize,
    pub reconciled: usize,
    pub outflows: usize,
    pub sent_to_review: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Reconciler<'a> {
    db: &'a LedgerDb,
    settings: &'a ReconciliationSettings,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a LedgerDb, settings: &'a ReconciliationSettings) -> Self {
        Self { db, settings }
    }

    /// Attempt automatic resolution of one transaction.
    pub fn reconcile_transaction(
        &self,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<ReconcileOutcome> {
        let outcome = self.db.write(|txn| {
            let mut tx: StoredTransaction = txn
                .load(transaction_id)?
                .ok_or_else(|| VibanError::not_found("transaction", transaction_id))?;
            if !tx.is_eligible() {
                return Ok::<_, VibanError>(ReconcileOutcome::Skipped {
                    transaction_id: tx.transaction_id,
                    status: tx.status,
                });
            }
            let mut account = load_account(txn, &tx.virtual_iban_id)?;

            if tx.currency != account.currency {
                let note = ReviewNote::CurrencyMismatch {
                    expected: account.currency.clone(),
                    actual: tx.currency.clone(),
                };
                return send_to_review(txn, tx, note, now);
            }

            if tx.direction == Direction::Debit {
                apply_outflow(txn, &mut tx, &mut account, now)?;
                return Ok(ReconcileOutcome::Reconciled {
                    transaction: tx,
                    target: None,
                });
            }

            if account.status != AccountStatus::Active {
                let note = ReviewNote::AccountNotActive {
                    status: account.status.as_str().to_string(),
                };
                return send_to_review(txn, tx, note, now);
            }

            match find_match(txn, &tx, &account, self.settings)? {
                MatchOutcome::Matched { target, method } => {
                    let target_ref = target.target_ref();
                    apply_match(txn, &mut tx, &mut account, target, method, "reconciliation", now)?;
                    Ok(ReconcileOutcome::Reconciled {
                        transaction: tx,
                        target: Some(target_ref),
                    })
                }
                MatchOutcome::Unmatched(note) => send_to_review(txn, tx, note, now),
            }
        })?;

        log_outcome(&outcome);
        Ok(outcome)
    }

    /// Ingest a partner transaction and, when it is new, try to reconcile it.
    ///
    /// Shared by the webhook handler and the payment poller.
    pub fn ingest_and_reconcile(
        &self,
        incoming: &PartnerTransaction,
        now: DateTime<Utc>,
    ) -> VibanResult<(IngestOutcome, Option<ReconcileOutcome>)> {
        let ingested = ingest_transaction(self.db, incoming, now)?;
        if !ingested.is_new() {
            return Ok((ingested, None));
        }
        let reconciled = self.reconcile_transaction(&ingested.transaction().transaction_id, now)?;
        Ok((ingested, Some(reconciled)))
    }

    /// Try every PENDING or VOP_HELD transaction once.
    ///
    /// A failure on one transaction is logged and counted; the sweep moves on.
    pub fn run_sweep(&self, now: DateTime<Utc>) -> VibanResult<SweepSummary> {
        let open = TransactionRepository::new(self.db).list_open()?;
        let mut summary = SweepSummary {
            examined: open.len(),
            ..SweepSummary::default()
        };

        for tx in open {
            match self.reconcile_transaction(&tx.transaction_id, now) {
                Ok(ReconcileOutcome::Reconciled { target: Some(_), .. }) => summary.reconciled += 1,
                Ok(ReconcileOutcome::Reconciled { target: None, .. }) => summary.outflows += 1,
                Ok(ReconcileOutcome::SentToReview { .. }) => summary.sent_to_review += 1,
                Ok(ReconcileOutcome::Skipped { .. }) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        transaction_id = %tx.transaction_id,
                        error = %e,
                        "Reconciliation attempt failed"
                    );
                }
            }
        }

        info!(
            examined = summary.examined,
            reconciled = summary.reconciled,
            outflows = summary.outflows,
            sent_to_review = summary.sent_to_review,
            failed = summary.failed,
            "Reconciliation sweep finished"
        );
        Ok(summary)
    }

    /// Link a transaction to a target chosen by an administrator.
    pub fn manual_reconcile(
        &self,
        transaction_id: &str,
        target: &TargetRef,
        admin_user_id: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredTransaction> {
        let tx = self.db.write(|txn| {
            let mut tx: StoredTransaction = txn
                .load(transaction_id)?
                .ok_or_else(|| VibanError::not_found("transaction", transaction_id))?;
            match tx.status {
                TxStatus::Reconciled => {
                    return Err(VibanError::already_processed("transaction", transaction_id))
                }
                TxStatus::Failed => {
                    return Err(VibanError::InvalidState(format!(
                        "transaction {transaction_id} was rejected"
                    )))
                }
                TxStatus::VopHeld if tx.vop_approved != Some(true) => {
                    return Err(VibanError::InvalidState(format!(
                        "transaction {transaction_id} is awaiting payee verification review"
                    )))
                }
                _ => {}
            }
            if tx.direction == Direction::Debit {
                return Err(VibanError::InvalidState(
                    "outgoing transactions have no reconciliation target".to_string(),
                ));
            }

            let mut account = load_account(txn, &tx.virtual_iban_id)?;
            if tx.currency != account.currency {
                return Err(VibanError::Mismatch(format!(
                    "transaction currency {} does not match account currency {}",
                    tx.currency, account.currency
                )));
            }
            if account.status == AccountStatus::Closed {
                return Err(VibanError::AccountNotEligible {
                    account_id: account.account_id.clone(),
                    status: account.status.as_str().to_string(),
                });
            }

            let resolved = match target.target_type {
                TargetType::TopUpRequest => {
                    let request: StoredTopUp = txn
                        .load(&target.target_id)?
                        .ok_or_else(|| VibanError::not_found("top_up_request", &target.target_id))?;
                    check_top_up(&request, &tx, self.settings)
                        .map_err(|note| note_to_error(note, "top_up_request"))?;
                    MatchTarget::TopUp(request)
                }
                TargetType::Order => {
                    let order: StoredOrder = txn
                        .load(&target.target_id)?
                        .ok_or_else(|| VibanError::not_found("order", &target.target_id))?;
                    check_order(&order, &tx, &account, self.settings)
                        .map_err(|note| note_to_error(note, "order"))?;
                    MatchTarget::Order(order)
                }
            };

            let method = ReconciledBy::Manual {
                admin_user_id: admin_user_id.to_string(),
            };
            apply_match(txn, &mut tx, &mut account, resolved, method, admin_user_id, now)?;
            Ok::<_, VibanError>(tx)
        })?;

        info!(
            transaction_id,
            target_id = %target.target_id,
            admin_user_id,
            "Transaction manually reconciled"
        );
        Ok(tx)
    }
}

fn load_account(txn: &impl LedgerRead, account_id: &str) -> VibanResult<StoredAccount> {
    txn.load(account_id)?
        .ok_or_else(|| VibanError::not_found("account", account_id))
}

fn note_to_error(note: ReviewNote, resource: &'static str) -> VibanError {
    match note {
        ReviewNote::ReferenceTargetNotPending { target, .. } => {
            VibanError::already_processed(resource, target.target_id)
        }
        ReviewNote::ReferenceTargetMismatch { detail, .. } => VibanError::Mismatch(detail),
        other => VibanError::InvalidState(format!("{other:?}")),
    }
}

/// Apply a resolved match: target side effect, balance credit, status change.
fn apply_match(
    txn: &impl LedgerWrite,
    tx: &mut StoredTransaction,
    account: &mut StoredAccount,
    target: MatchTarget,
    method: ReconciledBy,
    actor: &str,
    now: DateTime<Utc>,
) -> VibanResult<()> {
    if !tx.status.can_transition_to(TxStatus::Reconciled) {
        return Err(VibanError::InvalidState(format!(
            "transaction {} cannot move from {:?} to RECONCILED",
            tx.transaction_id, tx.status
        )));
    }

    let target_ref = target.target_ref();
    match target {
        MatchTarget::TopUp(request) => {
            complete_request(txn, &request.request_id, &tx.transaction_id, now)?;
            tx.reconciled_top_up_request_id = Some(request.request_id);
        }
        MatchTarget::Order(order) => {
            record_pay_in(txn, order, tx, now)?;
            tx.reconciled_order_id = Some(target_ref.target_id.clone());
        }
    }

    apply_balance_change(
        txn,
        account,
        tx.amount_minor,
        BalanceEntryKind::Credit,
        &tx.transaction_id,
        now,
    )?;

    tx.status = TxStatus::Reconciled;
    tx.reconciled_by = Some(method.clone());
    tx.reconciled_at = Some(now);
    tx.review_note = None;
    tx.last_attempt_at = Some(now);
    tx.updated_at = now;
    txn.store(tx)?;

    AuditEvent::new(AuditEventType::TransactionReconciled)
        .with_actor(actor)
        .with_resource("transaction", &tx.transaction_id)
        .with_details(json!({
            "target": target_ref,
            "method": method,
            "amount_minor": tx.amount_minor,
            "account_id": account.account_id,
        }))
        .at(now)
        .record(txn)?;
    Ok(())
}

/// Record receipt of funds for an order and mark it PAID.
fn record_pay_in(
    txn: &impl LedgerWrite,
    mut order: StoredOrder,
    tx: &StoredTransaction,
    now: DateTime<Utc>,
) -> VibanResult<StoredPayIn> {
    // Re-read under the write lock before the conditional transition.
    let current: StoredOrder = txn
        .load(&order.order_id)?
        .ok_or_else(|| VibanError::not_found("order", &order.order_id))?;
    if current.status != OrderStatus::AwaitingPayment {
        return Err(VibanError::already_processed("order", &order.order_id));
    }

    let pay_in = StoredPayIn {
        pay_in_id: uuid::Uuid::new_v4().to_string(),
        order_id: order.order_id.clone(),
        transaction_id: tx.transaction_id.clone(),
        virtual_iban_id: tx.virtual_iban_id.clone(),
        amount_minor: tx.amount_minor,
        currency: tx.currency.clone(),
        received_at: tx.booked_at,
        recorded_at: now,
    };
    txn.store(&pay_in)?;

    order.status = OrderStatus::Paid;
    order.virtual_iban_id = Some(tx.virtual_iban_id.clone());
    order.pay_in_id = Some(pay_in.pay_in_id.clone());
    order.paid_transaction_id = Some(tx.transaction_id.clone());
    order.paid_at = Some(now);
    order.updated_at = now;
    txn.store(&order)?;
    txn.unlink(AWAITING_ORDER_BY_OWNER, &order.awaiting_key())?;

    AuditEvent::new(AuditEventType::OrderPaid)
        .with_actor("reconciliation")
        .with_resource("order", &order.order_id)
        .with_details(json!({
            "pay_in_id": pay_in.pay_in_id,
            "transaction_id": tx.transaction_id,
        }))
        .at(now)
        .record(txn)?;
    Ok(pay_in)
}

/// Apply a debit straight to the balance; outflows have no target.
fn apply_outflow(
    txn: &impl LedgerWrite,
    tx: &mut StoredTransaction,
    account: &mut StoredAccount,
    now: DateTime<Utc>,
) -> VibanResult<()> {
    apply_balance_change(
        txn,
        account,
        -tx.amount_minor,
        BalanceEntryKind::Debit,
        &tx.transaction_id,
        now,
    )?;
    tx.status = TxStatus::Reconciled;
    tx.reconciled_by = Some(ReconciledBy::Outflow);
    tx.reconciled_at = Some(now);
    tx.review_note = None;
    tx.last_attempt_at = Some(now);
    tx.updated_at = now;
    txn.store(tx)?;

    AuditEvent::new(AuditEventType::OutflowApplied)
        .with_actor("reconciliation")
        .with_resource("transaction", &tx.transaction_id)
        .with_details(json!({
            "amount_minor": tx.amount_minor,
            "account_id": account.account_id,
        }))
        .at(now)
        .record(txn)?;
    Ok(())
}

fn send_to_review(
    txn: &impl LedgerWrite,
    mut tx: StoredTransaction,
    note: ReviewNote,
    now: DateTime<Utc>,
) -> VibanResult<ReconcileOutcome> {
    let changed = tx.review_note.as_ref() != Some(&note);
    tx.review_note = Some(note.clone());
    tx.last_attempt_at = Some(now);
    tx.updated_at = now;
    txn.store(&tx)?;

    // Only log the first time a given reason is recorded; sweeps retry often.
    if changed {
        AuditEvent::new(AuditEventType::TransactionSentToReview)
            .with_actor("reconciliation")
            .with_resource("transaction", &tx.transaction_id)
            .with_details(json!({ "note": note }))
            .at(now)
            .record(txn)?;
    }
    Ok(ReconcileOutcome::SentToReview {
        transaction: tx,
        note,
    })
}

fn log_outcome(outcome: &ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::Reconciled {
            transaction,
            target,
        } => info!(
            transaction_id = %transaction.transaction_id,
            target = ?target,
            amount_minor = transaction.amount_minor,
            "Transaction reconciled"
        ),
        ReconcileOutcome::SentToReview { transaction, note } => info!(
            transaction_id = %transaction.transaction_id,
            note = ?note,
            "Transaction left for manual review"
        ),
        ReconcileOutcome::Skipped {
            transaction_id,
            status,
        } => tracing::debug!(
            transaction_id = %transaction_id,
            status = ?status,
            "Transaction not eligible for reconciliation"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        AccountRepository, OrderRepository, TopUpRepository, TopUpStatus,
    };
    use crate::testing::{active_account, awaiting_order, credit, TestLedger};
    use crate::viban::balance::audit_balance;
    use crate::viban::topups::TopUpManager;
    use chrono::Duration;

    fn balance(db: &LedgerDb, account_id: &str) -> i64 {
        AccountRepository::new(db)
            .get(account_id)
            .unwrap()
            .unwrap()
            .balance_minor
    }

    #[test]
    fn reference_match_completes_top_up_and_credits_balance() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();

        // The generated reference is random; pin it to the scenario value.
        let mut request = manager
            .create_request("user-1", &account.account_id, 10_000, "EUR", now)
            .unwrap();
        ledger
            .db
            .write(|txn| {
                txn.unlink(crate::storage::TOPUP_BY_REFERENCE, &request.normalized_reference)?;
                request.reference = "TU-ABC123".to_string();
                request.normalized_reference = "tuabc123".to_string();
                txn.store(&request)?;
                txn.link(crate::storage::TOPUP_BY_REFERENCE, "tuabc123", &request.request_id)
            })
            .unwrap();

        let mut incoming = credit("ext-1", "prov-1", 10_000, now + Duration::minutes(5));
        incoming.reference = Some("tu-abc123".to_string());

        let reconciler = Reconciler::new(&ledger.db, &settings);
        let (ingested, reconciled) = reconciler
            .ingest_and_reconcile(&incoming, now + Duration::minutes(6))
            .unwrap();
        assert!(ingested.is_new());
        match reconciled {
            Some(ReconcileOutcome::Reconciled { transaction, target }) => {
                assert_eq!(transaction.status, TxStatus::Reconciled);
                assert_eq!(transaction.reconciled_by, Some(ReconciledBy::Reference));
                assert_eq!(
                    transaction.reconciled_top_up_request_id.as_deref(),
                    Some(request.request_id.as_str())
                );
                assert_eq!(target, Some(TargetRef::top_up(&request.request_id)));
            }
            other => panic!("expected reconciliation, got {other:?}"),
        }

        let stored = TopUpRepository::new(&ledger.db)
            .get(&request.request_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TopUpStatus::Completed);
        assert!(stored.transaction_id.is_some());
        assert_eq!(balance(&ledger.db, &account.account_id), 10_000);
        assert!(audit_balance(&ledger.db, &account.account_id).unwrap().consistent);
    }

    #[test]
    fn reconciling_twice_is_a_no_op() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        let request = manager
            .create_request("user-1", &account.account_id, 10_000, "EUR", now)
            .unwrap();
        let mut incoming = credit("ext-1", "prov-1", 10_000, now);
        incoming.reference = Some(request.reference.clone());

        let reconciler = Reconciler::new(&ledger.db, &settings);
        let (ingested, _) = reconciler.ingest_and_reconcile(&incoming, now).unwrap();
        let id = ingested.transaction().transaction_id.clone();

        let again = reconciler.reconcile_transaction(&id, now).unwrap();
        assert!(matches!(
            again,
            ReconcileOutcome::Skipped {
                status: TxStatus::Reconciled,
                ..
            }
        ));
        // Redelivery of the webhook does not re-run matching either.
        let (redelivered, reconciled) = reconciler.ingest_and_reconcile(&incoming, now).unwrap();
        assert!(!redelivered.is_new());
        assert!(reconciled.is_none());
        assert_eq!(balance(&ledger.db, &account.account_id), 10_000);
    }

    #[test]
    fn expired_request_is_not_reopened() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let t0 = Utc::now();
        let request = manager
            .create_request("user-1", &account.account_id, 10_000, "EUR", t0)
            .unwrap();
        assert_eq!(request.expires_at, t0 + Duration::hours(24));

        let t25 = t0 + Duration::hours(25);
        assert_eq!(manager.expire_old_requests(t25).unwrap().expired, 1);

        let mut incoming = credit("ext-1", "prov-1", 10_000, t25 + Duration::minutes(1));
        incoming.reference = Some(request.reference.clone());
        let reconciler = Reconciler::new(&ledger.db, &settings);
        let (_, outcome) = reconciler
            .ingest_and_reconcile(&incoming, t25 + Duration::minutes(2))
            .unwrap();

        match outcome {
            Some(ReconcileOutcome::SentToReview { transaction, note }) => {
                assert_eq!(transaction.status, TxStatus::Pending);
                assert!(matches!(note, ReviewNote::ReferenceTargetNotPending { .. }));
            }
            other => panic!("expected review, got {other:?}"),
        }
        let stored = TopUpRepository::new(&ledger.db)
            .get(&request.request_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TopUpStatus::Expired);
        assert_eq!(balance(&ledger.db, &account.account_id), 0);
    }

    #[test]
    fn two_ambiguous_top_ups_leave_both_transactions_unreconciled() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        for hours in [3, 2] {
            manager
                .create_request(
                    "user-1",
                    &account.account_id,
                    7_500,
                    "EUR",
                    now - Duration::hours(hours),
                )
                .unwrap();
        }

        let reconciler = Reconciler::new(&ledger.db, &settings);
        for external_id in ["ext-a", "ext-b"] {
            let incoming = credit(external_id, "prov-1", 7_500, now);
            let (_, outcome) = reconciler.ingest_and_reconcile(&incoming, now).unwrap();
            assert!(matches!(
                outcome,
                Some(ReconcileOutcome::SentToReview {
                    note: ReviewNote::AmbiguousCandidates { .. },
                    ..
                })
            ));
        }

        let queue = TransactionRepository::new(&ledger.db)
            .list_unreconciled()
            .unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|tx| tx.status == TxStatus::Pending));
        let pending = TopUpRepository::new(&ledger.db)
            .list_by_owner("user-1")
            .unwrap();
        assert!(pending.iter().all(|r| r.status == TopUpStatus::Pending));
        assert_eq!(balance(&ledger.db, &account.account_id), 0);
    }

    #[test]
    fn order_payment_records_pay_in() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let now = Utc::now();
        let order = awaiting_order(&ledger.db, "user-1", "ORD-9", 12_345, "EUR", now - Duration::hours(1));

        let mut incoming = credit("ext-1", "prov-1", 12_345, now);
        incoming.reference = Some("ORD-9".to_string());
        let reconciler = Reconciler::new(&ledger.db, &settings);
        reconciler.ingest_and_reconcile(&incoming, now).unwrap();

        let paid = OrderRepository::new(&ledger.db)
            .get(&order.order_id)
            .unwrap()
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.virtual_iban_id.as_deref(), Some(account.account_id.as_str()));
        let pay_in = OrderRepository::new(&ledger.db)
            .get_pay_in(paid.pay_in_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(pay_in.amount_minor, 12_345);
        assert_eq!(balance(&ledger.db, &account.account_id), 12_345);
    }

    #[test]
    fn debits_are_applied_as_outflows() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let now = Utc::now();
        let mut incoming = credit("ext-out", "prov-1", 2_000, now);
        incoming.direction = Direction::Debit;

        let reconciler = Reconciler::new(&ledger.db, &settings);
        ingest_transaction(&ledger.db, &incoming, now).unwrap();
        let summary = reconciler.run_sweep(now).unwrap();
        assert_eq!(summary.outflows, 1);
        assert_eq!(balance(&ledger.db, &account.account_id), -2_000);
    }

    #[test]
    fn suspended_account_credits_wait_for_review() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let mut account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        account.status = AccountStatus::Suspended;
        ledger.db.write(|txn| txn.store(&account)).unwrap();

        let reconciler = Reconciler::new(&ledger.db, &settings);
        let (_, outcome) = reconciler
            .ingest_and_reconcile(&credit("ext-1", "prov-1", 100, Utc::now()), Utc::now())
            .unwrap();
        assert!(matches!(
            outcome,
            Some(ReconcileOutcome::SentToReview {
                note: ReviewNote::AccountNotActive { .. },
                ..
            })
        ));
    }

    #[test]
    fn foreign_currency_bookings_never_touch_the_balance() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let now = Utc::now();
        let order = awaiting_order(&ledger.db, "user-1", "ORD-GBP", 5_000, "GBP", now - Duration::hours(1));
        let reconciler = Reconciler::new(&ledger.db, &settings);

        let mut pound_credit = credit("ext-gbp", "prov-1", 5_000, now);
        pound_credit.currency = "gbp".to_string();
        pound_credit.reference = Some("ORD-GBP".to_string());
        let (ingested, outcome) = reconciler.ingest_and_reconcile(&pound_credit, now).unwrap();
        assert_eq!(ingested.transaction().currency, "GBP");
        assert!(matches!(
            outcome,
            Some(ReconcileOutcome::SentToReview {
                note: ReviewNote::CurrencyMismatch { ref expected, ref actual },
                ..
            }) if expected == "EUR" && actual == "GBP"
        ));

        let mut dollar_debit = credit("ext-usd", "prov-1", 700, now);
        dollar_debit.currency = "USD".to_string();
        dollar_debit.direction = Direction::Debit;
        ingest_transaction(&ledger.db, &dollar_debit, now).unwrap();
        let summary = reconciler.run_sweep(now).unwrap();
        assert_eq!(summary.outflows, 0);
        assert_eq!(summary.sent_to_review, 2);

        assert_eq!(balance(&ledger.db, &account.account_id), 0);
        let untouched = OrderRepository::new(&ledger.db)
            .get(&order.order_id)
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status, OrderStatus::AwaitingPayment);

        let manual = reconciler.manual_reconcile(
            &ingested.transaction().transaction_id,
            &TargetRef::order(&order.order_id),
            "admin-1",
            now,
        );
        assert!(matches!(manual, Err(VibanError::Mismatch(_))));
        assert_eq!(balance(&ledger.db, &account.account_id), 0);
    }

    #[test]
    fn manual_reconcile_links_chosen_target() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        let first = manager
            .create_request("user-1", &account.account_id, 7_500, "EUR", now - Duration::hours(1))
            .unwrap();
        manager
            .create_request("user-1", &account.account_id, 7_500, "EUR", now - Duration::hours(1))
            .unwrap();
        let reconciler = Reconciler::new(&ledger.db, &settings);
        let (ingested, _) = reconciler
            .ingest_and_reconcile(&credit("ext-1", "prov-1", 7_500, now), now)
            .unwrap();
        let tx_id = ingested.transaction().transaction_id.clone();

        let wrong = reconciler.manual_reconcile(&tx_id, &TargetRef::order("nope"), "admin-1", now);
        assert!(matches!(wrong, Err(VibanError::NotFound { .. })));

        let linked = reconciler
            .manual_reconcile(&tx_id, &TargetRef::top_up(&first.request_id), "admin-1", now)
            .unwrap();
        assert_eq!(linked.status, TxStatus::Reconciled);
        assert_eq!(
            linked.reconciled_by,
            Some(ReconciledBy::Manual {
                admin_user_id: "admin-1".to_string()
            })
        );

        let again =
            reconciler.manual_reconcile(&tx_id, &TargetRef::top_up(&first.request_id), "admin-1", now);
        assert!(matches!(again, Err(VibanError::AlreadyProcessed { .. })));
        assert_eq!(balance(&ledger.db, &account.account_id), 7_500);
    }

    #[test]
    fn manual_reconcile_rejects_amount_mismatch() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        let request = manager
            .create_request("user-1", &account.account_id, 5_000, "EUR", now)
            .unwrap();
        let tx = ingest_transaction(&ledger.db, &credit("ext-1", "prov-1", 4_000, now), now)
            .unwrap()
            .transaction()
            .clone();

        let reconciler = Reconciler::new(&ledger.db, &settings);
        let result = reconciler.manual_reconcile(
            &tx.transaction_id,
            &TargetRef::top_up(&request.request_id),
            "admin-1",
            now,
        );
        assert!(matches!(result, Err(VibanError::Mismatch(_))));
    }

    #[test]
    fn completion_and_expiry_race_has_one_winner() {
        for round in 0..10 {
            let ledger = TestLedger::new();
            let settings = ReconciliationSettings::default();
            let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
            let t0 = Utc::now();
            let request = TopUpManager::new(&ledger.db, &settings)
                .create_request("user-1", &account.account_id, 10_000, "EUR", t0)
                .unwrap();

            // Booked in time, but processed after the deadline.
            let mut incoming = credit(&format!("ext-{round}"), "prov-1", 10_000, t0 + Duration::hours(23));
            incoming.reference = Some(request.reference.clone());
            let tx = ingest_transaction(&ledger.db, &incoming, t0 + Duration::hours(23))
                .unwrap()
                .transaction()
                .clone();
            let late = t0 + Duration::hours(25);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    Reconciler::new(&ledger.db, &settings)
                        .reconcile_transaction(&tx.transaction_id, late)
                        .unwrap();
                });
                scope.spawn(|| {
                    TopUpManager::new(&ledger.db, &settings)
                        .expire_old_requests(late)
                        .unwrap();
                });
            });

            let final_request = TopUpRepository::new(&ledger.db)
                .get(&request.request_id)
                .unwrap()
                .unwrap();
            let final_tx = TransactionRepository::new(&ledger.db)
                .get(&tx.transaction_id)
                .unwrap()
                .unwrap();
            match final_request.status {
                TopUpStatus::Completed => {
                    assert_eq!(final_tx.status, TxStatus::Reconciled);
                    assert_eq!(balance(&ledger.db, &account.account_id), 10_000);
                }
                TopUpStatus::Expired => {
                    assert_eq!(final_tx.status, TxStatus::Pending);
                    assert!(final_tx.reconciled_top_up_request_id.is_none());
                    assert_eq!(balance(&ledger.db, &account.account_id), 0);
                }
                other => panic!("unexpected terminal state {other:?}"),
            }
        }
    }
}

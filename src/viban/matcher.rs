// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tiered candidate search for an inbound credit.
//!
//! 1. **Reference**: the normalized payment reference (or, failing that, the
//!    partner correlation id) resolves to a top-up request or order. A
//!    resolved target that is not payable sends the credit to review; it
//!    never falls through to tier 2.
//! 2. **Amount + owner + window**: a single PENDING top-up on the same
//!    account, or a single AWAITING_PAYMENT order of the same owner, with the
//!    same currency, an amount within tolerance, and created inside the
//!    look-back window before the booking time.
//! 3. Anything else is left for manual review with a [`ReviewNote`].

use chrono::{DateTime, Utc};

use super::reference::normalize_reference;
use crate::config::ReconciliationSettings;
use crate::storage::{
    LedgerRead, LedgerResult, OrderStatus, ReconciledBy, ReviewNote, StoredAccount, StoredOrder,
    StoredTopUp, StoredTransaction, TargetRef, TopUpStatus, AWAITING_ORDER_BY_OWNER,
    ORDER_BY_REFERENCE, PENDING_TOPUP_BY_ACCOUNT, TOPUP_BY_REFERENCE,
};

/// A payable reconciliation target.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchTarget {
    TopUp(StoredTopUp),
    Order(StoredOrder),
}

impl MatchTarget {
    pub fn target_ref(&self) -> TargetRef {
        match self {
            MatchTarget::TopUp(r) => TargetRef::top_up(&r.request_id),
            MatchTarget::Order(o) => TargetRef::order(&o.order_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        target: MatchTarget,
        method: ReconciledBy,
    },
    Unmatched(ReviewNote),
}

/// Search for the single target an inbound credit pays.
pub fn find_match(
    txn: &impl LedgerRead,
    tx: &StoredTransaction,
    account: &StoredAccount,
    settings: &ReconciliationSettings,
) -> LedgerResult<MatchOutcome> {
    if let Some(outcome) = match_by_reference(txn, tx, account, settings)? {
        return Ok(outcome);
    }
    match_by_amount_owner_window(txn, tx, account, settings)
}

fn match_by_reference(
    txn: &impl LedgerRead,
    tx: &StoredTransaction,
    account: &StoredAccount,
    settings: &ReconciliationSettings,
) -> LedgerResult<Option<MatchOutcome>> {
    let keys = [
        tx.external_reference.as_deref(),
        tx.external_correlation_id.as_deref(),
    ];

    for raw in keys.into_iter().flatten() {
        let key = normalize_reference(raw);
        if key.is_empty() {
            continue;
        }

        if let Some(request) = txn.load_by_index::<StoredTopUp>(TOPUP_BY_REFERENCE, &key)? {
            let outcome = match check_top_up(&request, tx, settings) {
                Ok(()) => MatchOutcome::Matched {
                    target: MatchTarget::TopUp(request),
                    method: ReconciledBy::Reference,
                },
                Err(note) => MatchOutcome::Unmatched(note),
            };
            return Ok(Some(outcome));
        }

        if let Some(order) = txn.load_by_index::<StoredOrder>(ORDER_BY_REFERENCE, &key)? {
            let outcome = match check_order(&order, tx, account, settings) {
                Ok(()) => MatchOutcome::Matched {
                    target: MatchTarget::Order(order),
                    method: ReconciledBy::Reference,
                },
                Err(note) => MatchOutcome::Unmatched(note),
            };
            return Ok(Some(outcome));
        }
    }
    Ok(None)
}

fn match_by_amount_owner_window(
    txn: &impl LedgerRead,
    tx: &StoredTransaction,
    account: &StoredAccount,
    settings: &ReconciliationSettings,
) -> LedgerResult<MatchOutcome> {
    let window_start = tx.booked_at - settings.match_lookback;
    let in_window =
        |created_at: DateTime<Utc>| created_at >= window_start && created_at <= tx.booked_at;

    // Only the open sets: PENDING requests on this account, unpaid orders of its owner.
    let top_ups: Vec<StoredTopUp> =
        txn.load_by_prefix(PENDING_TOPUP_BY_ACCOUNT, &format!("{}|", tx.virtual_iban_id))?;
    let orders: Vec<StoredOrder> =
        txn.load_by_prefix(AWAITING_ORDER_BY_OWNER, &format!("{}|", account.owner_user_id))?;

    let mut candidates: Vec<MatchTarget> = top_ups
        .into_iter()
        .filter(|r| in_window(r.created_at) && check_top_up(r, tx, settings).is_ok())
        .map(MatchTarget::TopUp)
        .collect();
    candidates.extend(
        orders
            .into_iter()
            .filter(|o| in_window(o.created_at) && check_order(o, tx, account, settings).is_ok())
            .map(MatchTarget::Order),
    );

    Ok(match candidates.len() {
        0 => MatchOutcome::Unmatched(ReviewNote::NoCandidate),
        1 => {
            let target = candidates.remove(0);
            MatchOutcome::Matched {
                target,
                method: ReconciledBy::AmountOwnerWindow,
            }
        }
        _ => MatchOutcome::Unmatched(ReviewNote::AmbiguousCandidates {
            candidates: candidates.iter().map(MatchTarget::target_ref).collect(),
        }),
    })
}

fn within_tolerance(expected: i64, actual: i64, tolerance: i64) -> bool {
    (expected - actual).abs() <= tolerance
}

/// Whether `tx` may complete `request`.
pub(crate) fn check_top_up(
    request: &StoredTopUp,
    tx: &StoredTransaction,
    settings: &ReconciliationSettings,
) -> Result<(), ReviewNote> {
    let target = TargetRef::top_up(&request.request_id);
    if request.status != TopUpStatus::Pending {
        return Err(ReviewNote::ReferenceTargetNotPending {
            target,
            status: request.status.as_str().to_string(),
        });
    }
    if request.expires_at < tx.booked_at {
        return Err(ReviewNote::ReferenceTargetNotPending {
            target,
            status: "EXPIRED".to_string(),
        });
    }
    check_payment(
        target,
        request.virtual_iban_id == tx.virtual_iban_id,
        &request.currency,
        request.amount_minor,
        tx,
        settings,
    )
}

/// Whether `tx`, booked on `account`, may pay `order`.
pub(crate) fn check_order(
    order: &StoredOrder,
    tx: &StoredTransaction,
    account: &StoredAccount,
    settings: &ReconciliationSettings,
) -> Result<(), ReviewNote> {
    let target = TargetRef::order(&order.order_id);
    if order.status != OrderStatus::AwaitingPayment {
        return Err(ReviewNote::ReferenceTargetNotPending {
            target,
            status: order.status.as_str().to_string(),
        });
    }
    check_payment(
        target,
        order.owner_user_id == account.owner_user_id,
        &order.currency_code,
        order.total_fiat_minor,
        tx,
        settings,
    )
}

fn check_payment(
    target: TargetRef,
    same_owner: bool,
    currency: &str,
    amount_minor: i64,
    tx: &StoredTransaction,
    settings: &ReconciliationSettings,
) -> Result<(), ReviewNote> {
    let detail = if !same_owner {
        "paid into an account of a different owner".to_string()
    } else if currency != tx.currency {
        format!("currency {} does not match expected {currency}", tx.currency)
    } else if !within_tolerance(amount_minor, tx.amount_minor, settings.amount_tolerance_minor) {
        format!(
            "amount {} does not match expected {amount_minor}",
            tx.amount_minor
        )
    } else {
        return Ok(());
    };
    Err(ReviewNote::ReferenceTargetMismatch { target, detail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{active_account, awaiting_order, credit, TestLedger};
    use crate::viban::ingest::ingest_transaction;
    use crate::viban::topups::TopUpManager;
    use crate::storage::{LedgerDb, TargetType};
    use chrono::Duration;

    fn ingest(db: &LedgerDb, reference: Option<&str>, amount: i64, at: DateTime<Utc>) -> StoredTransaction {
        let mut incoming = credit(&uuid::Uuid::new_v4().to_string(), "prov-1", amount, at);
        incoming.reference = reference.map(str::to_string);
        ingest_transaction(db, &incoming, at)
            .unwrap()
            .transaction()
            .clone()
    }

    fn run(db: &LedgerDb, tx: &StoredTransaction, account: &StoredAccount) -> MatchOutcome {
        let settings = ReconciliationSettings::default();
        db.read(|txn| find_match(txn, tx, account, &settings)).unwrap()
    }

    #[test]
    fn reference_wins_over_amount_window() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();

        let referenced = manager
            .create_request("user-1", &account.account_id, 10_000, "EUR", now - Duration::hours(2))
            .unwrap();
        // Same amount, would be a tier-2 candidate as well.
        manager
            .create_request("user-1", &account.account_id, 10_000, "EUR", now - Duration::hours(1))
            .unwrap();

        let tx = ingest(&ledger.db, Some(&referenced.reference.to_lowercase()), 10_000, now);
        match run(&ledger.db, &tx, &account) {
            MatchOutcome::Matched { target, method } => {
                assert_eq!(method, ReconciledBy::Reference);
                assert_eq!(target.target_ref(), TargetRef::top_up(&referenced.request_id));
            }
            other => panic!("expected reference match, got {other:?}"),
        }
    }

    #[test]
    fn unique_amount_candidate_matches_within_window() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        let request = manager
            .create_request("user-1", &account.account_id, 4_200, "EUR", now - Duration::hours(3))
            .unwrap();

        let tx = ingest(&ledger.db, None, 4_200, now);
        match run(&ledger.db, &tx, &account) {
            MatchOutcome::Matched { target, method } => {
                assert_eq!(method, ReconciledBy::AmountOwnerWindow);
                assert_eq!(target.target_ref(), TargetRef::top_up(&request.request_id));
            }
            other => panic!("expected window match, got {other:?}"),
        }
    }

    #[test]
    fn candidates_outside_window_or_amount_are_ignored() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings {
            topup_ttl: Duration::hours(100),
            ..ReconciliationSettings::default()
        };
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        manager
            .create_request("user-1", &account.account_id, 4_200, "EUR", now - Duration::hours(49))
            .unwrap();
        manager
            .create_request("user-1", &account.account_id, 4_201, "EUR", now - Duration::hours(1))
            .unwrap();

        let tx = ingest(&ledger.db, None, 4_200, now);
        assert_eq!(
            run(&ledger.db, &tx, &account),
            MatchOutcome::Unmatched(ReviewNote::NoCandidate)
        );
    }

    #[test]
    fn two_equal_candidates_are_ambiguous() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        manager
            .create_request("user-1", &account.account_id, 5_000, "EUR", now - Duration::hours(1))
            .unwrap();
        awaiting_order(&ledger.db, "user-1", "ORD-77", 5_000, "EUR", now - Duration::hours(2));

        let tx = ingest(&ledger.db, Some("no such ref"), 5_000, now);
        match run(&ledger.db, &tx, &account) {
            MatchOutcome::Unmatched(ReviewNote::AmbiguousCandidates { candidates }) => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates.iter().any(|c| c.target_type == TargetType::Order));
                assert!(candidates.iter().any(|c| c.target_type == TargetType::TopUpRequest));
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn reference_to_mismatched_amount_does_not_fall_through() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        let referenced = manager
            .create_request("user-1", &account.account_id, 10_000, "EUR", now - Duration::hours(1))
            .unwrap();
        manager
            .create_request("user-1", &account.account_id, 9_000, "EUR", now - Duration::hours(1))
            .unwrap();

        let tx = ingest(&ledger.db, Some(&referenced.reference), 9_000, now);
        assert!(matches!(
            run(&ledger.db, &tx, &account),
            MatchOutcome::Unmatched(ReviewNote::ReferenceTargetMismatch { .. })
        ));
    }

    #[test]
    fn order_reference_matches_owner_account() {
        let ledger = TestLedger::new();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let now = Utc::now();
        let order = awaiting_order(&ledger.db, "user-1", "ORD-2026-0042", 25_000, "EUR", now - Duration::days(5));

        let tx = ingest(&ledger.db, Some("ord 2026 0042"), 25_000, now);
        match run(&ledger.db, &tx, &account) {
            MatchOutcome::Matched { target: MatchTarget::Order(o), method } => {
                assert_eq!(o.order_id, order.order_id);
                assert_eq!(method, ReconciledBy::Reference);
            }
            other => panic!("expected order match, got {other:?}"),
        }
    }

    #[test]
    fn settled_targets_leave_the_candidate_sets() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let manager = TopUpManager::new(&ledger.db, &settings);
        let now = Utc::now();
        let cancelled = manager
            .create_request("user-1", &account.account_id, 3_000, "EUR", now - Duration::hours(1))
            .unwrap();
        let open = manager
            .create_request("user-1", &account.account_id, 3_000, "EUR", now - Duration::hours(1))
            .unwrap();
        awaiting_order(&ledger.db, "user-2", "ORD-OTHER", 3_000, "EUR", now - Duration::hours(1));

        let indexed = |prefix: String| {
            ledger
                .db
                .read(|txn| txn.scan_index(PENDING_TOPUP_BY_ACCOUNT, &prefix))
                .unwrap()
        };
        assert_eq!(indexed(format!("{}|", account.account_id)).len(), 2);

        manager
            .cancel_request(&cancelled.request_id, "user-1", now)
            .unwrap();
        assert_eq!(
            indexed(format!("{}|", account.account_id)),
            vec![open.request_id.clone()]
        );

        // The cancelled twin and the other owner's order are no longer
        // candidates, so the remaining request is a unique match.
        let tx = ingest(&ledger.db, None, 3_000, now);
        match run(&ledger.db, &tx, &account) {
            MatchOutcome::Matched { target, .. } => {
                assert_eq!(target.target_ref(), TargetRef::top_up(&open.request_id));
            }
            other => panic!("expected the open request, got {other:?}"),
        }
    }

    #[test]
    fn tolerance_widens_amount_comparison() {
        assert!(within_tolerance(10_000, 10_000, 0));
        assert!(!within_tolerance(10_000, 10_001, 0));
        assert!(within_tolerance(10_000, 9_995, 5));
    }
}

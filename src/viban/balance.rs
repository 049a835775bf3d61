// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The single balance mutation path and its journal audit.
//!
//! Cached account balances change only through [`apply_balance_change`],
//! which runs inside the caller's write transaction and appends a
//! [`BalanceEntry`] next to the updated account.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::error::{VibanError, VibanResult};
use crate::storage::{
    BalanceEntry, BalanceEntryKind, BalanceEntryRepository, LedgerDb, LedgerWrite, StoredAccount,
    StoredTransaction, TxStatus,
};

/// Apply a signed delta to `account`, persisting the account and a journal entry.
pub(crate) fn apply_balance_change(
    txn: &impl LedgerWrite,
    account: &mut StoredAccount,
    delta_minor: i64,
    kind: BalanceEntryKind,
    source_id: &str,
    now: DateTime<Utc>,
) -> VibanResult<BalanceEntry> {
    let balance_after = account
        .balance_minor
        .checked_add(delta_minor)
        .ok_or_else(overflow)?;

    account.balance_minor = balance_after;
    account.last_balance_update = Some(now);
    account.updated_at = now;

    let entry = BalanceEntry {
        entry_id: uuid::Uuid::new_v4().to_string(),
        account_id: account.account_id.clone(),
        kind,
        delta_minor,
        balance_after_minor: balance_after,
        source_id: source_id.to_string(),
        recorded_at: now,
    };

    txn.store(account)?;
    txn.store(&entry)?;

    tracing::debug!(
        account_id = %account.account_id,
        delta_minor,
        balance_after,
        kind = ?kind,
        "Balance updated"
    );
    Ok(entry)
}

fn overflow() -> VibanError {
    VibanError::InvalidAmount("balance overflow".to_string())
}

/// Overflow-checked sum of signed amounts.
pub(crate) fn checked_total(amounts: impl IntoIterator<Item = i64>) -> VibanResult<i64> {
    amounts
        .into_iter()
        .try_fold(0i64, |total, amount| total.checked_add(amount))
        .ok_or_else(overflow)
}

/// Whether `tx` is one of `account`'s bookings that may reach its balance.
fn books_into(account: &StoredAccount, tx: &StoredTransaction) -> bool {
    tx.virtual_iban_id == account.account_id && tx.currency == account.currency
}

/// Signed total of `account`'s ingested transactions not yet applied to its balance.
///
/// Bookings in a foreign currency never reach the balance and are left out.
pub(crate) fn unapplied_net<'t>(
    account: &StoredAccount,
    transactions: impl IntoIterator<Item = &'t StoredTransaction>,
) -> VibanResult<i64> {
    checked_total(
        transactions
            .into_iter()
            .filter(|tx| books_into(account, tx))
            .filter(|tx| matches!(tx.status, TxStatus::Pending | TxStatus::VopHeld))
            .map(StoredTransaction::signed_amount),
    )
}

/// Balance the partner should report at `as_of`, given the cached balance.
///
/// Adds bookings up to `as_of` that are not applied yet and removes applied
/// bookings from after `as_of`, which the partner figure cannot contain.
pub(crate) fn expected_partner_balance<'t>(
    account: &StoredAccount,
    transactions: impl IntoIterator<Item = &'t StoredTransaction>,
    as_of: DateTime<Utc>,
) -> VibanResult<(i64, i64)> {
    let mut unapplied = Vec::new();
    let mut applied_later = Vec::new();
    for tx in transactions.into_iter().filter(|tx| books_into(account, tx)) {
        match tx.status {
            TxStatus::Pending | TxStatus::VopHeld if tx.booked_at <= as_of => {
                unapplied.push(tx.signed_amount())
            }
            TxStatus::Reconciled if tx.booked_at > as_of => applied_later.push(tx.signed_amount()),
            _ => {}
        }
    }
    let unapplied = checked_total(unapplied)?;
    let applied_later = checked_total(applied_later)?;
    let expected = account
        .balance_minor
        .checked_add(unapplied)
        .and_then(|b| b.checked_sub(applied_later))
        .ok_or_else(overflow)?;
    Ok((expected, unapplied))
}

/// Comparison of the cached balance against a replay of the journal.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BalanceAudit {
    pub account_id: String,
    pub cached_balance_minor: i64,
    pub journal_balance_minor: i64,
    /// `cached - journal`; zero when consistent.
    pub drift_minor: i64,
    pub entry_count: usize,
    pub consistent: bool,
}

/// Recompute an account's balance from its journal.
pub fn audit_balance(db: &LedgerDb, account_id: &str) -> VibanResult<BalanceAudit> {
    let account = crate::storage::AccountRepository::new(db)
        .get(account_id)?
        .ok_or_else(|| VibanError::not_found("account", account_id))?;
    let entries = BalanceEntryRepository::new(db).list_by_account(account_id)?;
    let journal_balance: i64 = entries.iter().map(|e| e.delta_minor).sum();
    let drift = account.balance_minor - journal_balance;

    if drift != 0 {
        tracing::warn!(
            account_id,
            cached = account.balance_minor,
            journal = journal_balance,
            "Cached balance drifted from journal"
        );
    }

    Ok(BalanceAudit {
        account_id: account_id.to_string(),
        cached_balance_minor: account.balance_minor,
        journal_balance_minor: journal_balance,
        drift_minor: drift,
        entry_count: entries.len(),
        consistent: drift == 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LedgerRead;
    use crate::testing::{active_account, TestLedger};

    #[test]
    fn journal_replays_to_cached_balance() {
        let ledger = TestLedger::new();
        let mut account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let now = Utc::now();

        ledger
            .db
            .write(|txn| {
                apply_balance_change(txn, &mut account, 10_000, BalanceEntryKind::Credit, "tx-1", now)?;
                apply_balance_change(txn, &mut account, -2_500, BalanceEntryKind::Debit, "tx-2", now)?;
                Ok::<_, VibanError>(())
            })
            .unwrap();

        let stored: StoredAccount = ledger
            .db
            .read(|txn| txn.load(&account.account_id))
            .unwrap()
            .unwrap();
        assert_eq!(stored.balance_minor, 7_500);

        let audit = audit_balance(&ledger.db, &account.account_id).unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.journal_balance_minor, 7_500);
        assert_eq!(audit.entry_count, 2);
    }

    #[test]
    fn audit_reports_drift_from_out_of_band_edits() {
        let ledger = TestLedger::new();
        let mut account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        account.balance_minor = 999;
        ledger.db.write(|txn| txn.store(&account)).unwrap();

        let audit = audit_balance(&ledger.db, &account.account_id).unwrap();
        assert!(!audit.consistent);
        assert_eq!(audit.drift_minor, 999);
    }

    #[test]
    fn totals_refuse_to_wrap() {
        assert_eq!(checked_total([5, -2, 7]).unwrap(), 10);
        assert!(matches!(
            checked_total([i64::MAX, 1]),
            Err(VibanError::InvalidAmount(_))
        ));
    }

    #[test]
    fn overflow_is_rejected_and_rolled_back() {
        let ledger = TestLedger::new();
        let mut account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        account.balance_minor = i64::MAX;

        let result = ledger.db.write(|txn| {
            apply_balance_change(txn, &mut account, 1, BalanceEntryKind::Credit, "tx-1", Utc::now())
        });
        assert!(matches!(result, Err(VibanError::InvalidAmount(_))));
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fallback poller for missed webhook deliveries.
//!
//! Re-fetches each account's recent partner transactions over a trailing
//! window and feeds them through the same idempotent ingestion path as the
//! webhook. PENDING accounts are also checked for activation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::accounts::AccountService;
use super::error::VibanResult;
use super::reconcile::Reconciler;
use crate::config::ReconciliationSettings;
use crate::providers::BankingPartner;
use crate::storage::{AccountRepository, AccountStatus};

/// Counts from one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncReport {
    /// Partner transactions examined; `new + already_known + failed`.
    pub checked: usize,
    /// Accounts whose transactions were fetched.
    pub accounts_checked: usize,
    /// PENDING accounts promoted to ACTIVE.
    pub activated: usize,
    /// Partner transactions seen for the first time.
    pub new: usize,
    pub already_known: usize,
    /// Transactions that could not be ingested.
    pub failed: usize,
    /// Accounts whose partner fetch failed.
    pub failed_accounts: Vec<String>,
}

pub struct PaymentSync<'a> {
    db: &'a crate::storage::LedgerDb,
    partner: &'a dyn BankingPartner,
    settings: &'a ReconciliationSettings,
}

impl<'a> PaymentSync<'a> {
    pub fn new(
        db: &'a crate::storage::LedgerDb,
        partner: &'a dyn BankingPartner,
        settings: &'a ReconciliationSettings,
    ) -> Self {
        Self {
            db,
            partner,
            settings,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> VibanResult<SyncReport> {
        let accounts = AccountRepository::new(self.db).list_with_status(&[
            AccountStatus::Pending,
            AccountStatus::Active,
            AccountStatus::Suspended,
        ])?;
        let since = now - self.settings.sync_window;
        let reconciler = Reconciler::new(self.db, self.settings);
        let service = AccountService::new(self.db, self.partner);
        let mut report = SyncReport::default();

        for account in accounts {
            if account.status == AccountStatus::Pending {
                match service.sync_account(&account.account_id, "payment_sync", now).await {
                    Ok(outcome) if outcome.activated => report.activated += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(account_id = %account.account_id, error = %e, "Pending account check failed");
                        report.failed_accounts.push(account.account_id);
                    }
                }
                continue;
            }

            let fetched = self
                .partner
                .list_transactions(&account.provider_account_id, since, now)
                .await;
            let transactions = match fetched {
                Ok(transactions) => transactions,
                Err(e) => {
                    warn!(
                        account_id = %account.account_id,
                        error = %e,
                        timeout = e.is_timeout(),
                        "Partner transaction fetch failed"
                    );
                    report.failed_accounts.push(account.account_id);
                    continue;
                }
            };
            report.accounts_checked += 1;

            for incoming in &transactions {
                report.checked += 1;
                match reconciler.ingest_and_reconcile(incoming, now) {
                    Ok((ingested, _)) if ingested.is_new() => report.new += 1,
                    Ok(_) => report.already_known += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            account_id = %account.account_id,
                            external_transaction_id = %incoming.external_transaction_id,
                            error = %e,
                            "Could not ingest polled transaction"
                        );
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            accounts_checked = report.accounts_checked,
            activated = report.activated,
            new = report.new,
            already_known = report.already_known,
            failed = report.failed,
            failed_accounts = report.failed_accounts.len(),
            "Payment sync finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::sandbox::{InjectedFailure, SandboxPartner};
    use crate::storage::{AccountRepository, TransactionRepository, TxStatus};
    use crate::testing::{active_account, credit, TestLedger};
    use crate::viban::ingest::ingest_transaction;
    use crate::viban::topups::TopUpManager;
    use chrono::Duration;

    #[tokio::test]
    async fn missed_webhook_is_picked_up_once() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let request = TopUpManager::new(&ledger.db, &settings)
            .create_request("user-1", &account.account_id, 3_000, "EUR", Utc::now())
            .unwrap();

        let partner = SandboxPartner::new("partner");
        partner.add_open_account("prov-1", "EUR", 0);
        let now = Utc::now();
        let mut missed = credit("ext-missed", "prov-1", 3_000, now - Duration::minutes(5));
        missed.reference = Some(request.reference.clone());
        partner.book(missed);

        let sync = PaymentSync::new(&ledger.db, &partner, &settings);
        let first = sync.run(now).await.unwrap();
        assert_eq!(first.accounts_checked, 1);
        assert_eq!(first.checked, 1);
        assert_eq!(first.new, 1);

        partner.book(credit("ext-other", "prov-1", 50, now - Duration::minutes(1)));
        let second = sync.run(now).await.unwrap();
        assert_eq!(second.accounts_checked, 1);
        assert_eq!(second.checked, 2);
        assert_eq!(second.new, 1);
        assert_eq!(second.already_known, 1);
        assert_eq!(
            second.checked,
            second.new + second.already_known + second.failed
        );

        let transactions = TransactionRepository::new(&ledger.db)
            .list_by_account(&account.account_id)
            .unwrap();
        assert_eq!(transactions.len(), 2);
        assert!(transactions
            .iter()
            .any(|tx| tx.external_transaction_id == "ext-missed" && tx.status == TxStatus::Reconciled));
    }

    #[tokio::test]
    async fn webhook_and_poller_do_not_double_ingest() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let partner = SandboxPartner::new("partner");
        partner.add_open_account("prov-1", "EUR", 0);
        let now = Utc::now();
        let delivered = credit("ext-1", "prov-1", 900, now - Duration::minutes(1));
        partner.book(delivered.clone());
        ingest_transaction(&ledger.db, &delivered, now).unwrap();

        let report = PaymentSync::new(&ledger.db, &partner, &settings)
            .run(now)
            .await
            .unwrap();
        assert_eq!(report.already_known, 1);
        assert_eq!(
            TransactionRepository::new(&ledger.db)
                .list_by_account(&account.account_id)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn partner_failure_is_reported_per_account() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let partner = SandboxPartner::new("partner");
        partner.inject_failure(Some(InjectedFailure::Unavailable));

        let report = PaymentSync::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(report.accounts_checked, 0);
        assert_eq!(report.failed_accounts, vec![account.account_id]);
    }

    #[tokio::test]
    async fn pending_account_is_activated() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let partner = SandboxPartner::new("partner");
        let account = AccountService::new(&ledger.db, &partner)
            .provision_account("user-1", "EUR", Utc::now())
            .await
            .unwrap();
        assert_eq!(account.status, AccountStatus::Pending);

        let report = PaymentSync::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.activated, 1);
        let stored = AccountRepository::new(&ledger.db)
            .get(&account.account_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance integrity validator.
//!
//! Compares the sum of cached ACTIVE account balances per currency against the
//! partner's aggregate. A mismatch is recorded as an OPEN discrepancy for an
//! operator; balances are never adjusted here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::balance::{checked_total, unapplied_net};
use super::error::{VibanError, VibanResult};
use crate::config::ReconciliationSettings;
use crate::providers::BankingPartner;
use crate::storage::{
    AccountStatus, AuditEvent, AuditEventType, CurrencyBalanceCheck, CurrencyCheckStatus,
    DiscrepancyStatus, LedgerDb, LedgerRead, LedgerWrite, StoredAccount, StoredDiscrepancy,
    StoredTransaction,
};

/// Result of one validation run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidationReport {
    pub run_at: DateTime<Utc>,
    /// `false` when at least one currency could not be checked.
    pub success: bool,
    /// `Some(false)` when any checked currency mismatched, `Some(true)` when
    /// every currency was checked and matched, `None` when nothing conclusive
    /// was learned.
    pub is_valid: Option<bool>,
    pub tolerance_minor: i64,
    pub currencies: Vec<CurrencyBalanceCheck>,
    /// Set when the run recorded a discrepancy.
    pub discrepancy_id: Option<String>,
}

struct LocalTotals {
    account_count: usize,
    balance_minor: i64,
    unapplied_minor: i64,
}

pub struct BalanceValidator<'a> {
    db: &'a LedgerDb,
    partner: &'a dyn BankingPartner,
    settings: &'a ReconciliationSettings,
}

impl<'a> BalanceValidator<'a> {
    pub fn new(
        db: &'a LedgerDb,
        partner: &'a dyn BankingPartner,
        settings: &'a ReconciliationSettings,
    ) -> Self {
        Self {
            db,
            partner,
            settings,
        }
    }

    /// Compare local and partner totals for every currency with an ACTIVE account.
    pub async fn run(&self, now: DateTime<Utc>) -> VibanResult<ValidationReport> {
        let totals = self.local_totals()?;
        let tolerance = self.settings.balance_tolerance_minor;
        let mut currencies = Vec::with_capacity(totals.len());

        for (currency, local) in totals {
            let check = match self.partner.get_aggregate_balance(&currency).await {
                Ok(provider_total) => {
                    let difference = provider_total.checked_sub(local.balance_minor);
                    let status = match difference {
                        Some(d) if d.unsigned_abs() <= tolerance.unsigned_abs() => {
                            CurrencyCheckStatus::Matched
                        }
                        _ => CurrencyCheckStatus::Mismatched,
                    };
                    CurrencyBalanceCheck {
                        currency,
                        account_count: local.account_count,
                        local_total_minor: local.balance_minor,
                        provider_total_minor: Some(provider_total),
                        difference_minor: difference,
                        unapplied_net_minor: local.unapplied_minor,
                        status,
                        error: difference
                            .is_none()
                            .then(|| "difference exceeds the i64 range".to_string()),
                    }
                }
                Err(e) => {
                    warn!(
                        currency = %currency,
                        error = %e,
                        timeout = e.is_timeout(),
                        "Could not fetch partner aggregate balance"
                    );
                    CurrencyBalanceCheck {
                        currency,
                        account_count: local.account_count,
                        local_total_minor: local.balance_minor,
                        provider_total_minor: None,
                        difference_minor: None,
                        unapplied_net_minor: local.unapplied_minor,
                        status: CurrencyCheckStatus::Unavailable,
                        error: Some(e.to_string()),
                    }
                }
            };
            currencies.push(check);
        }

        let unavailable = currencies
            .iter()
            .any(|c| c.status == CurrencyCheckStatus::Unavailable);
        let mismatched: Vec<CurrencyBalanceCheck> = currencies
            .iter()
            .filter(|c| c.status == CurrencyCheckStatus::Mismatched)
            .cloned()
            .collect();

        let is_valid = if !mismatched.is_empty() {
            Some(false)
        } else if unavailable {
            None
        } else {
            Some(true)
        };

        let discrepancy_id = if mismatched.is_empty() {
            None
        } else {
            Some(self.record_discrepancy(mismatched, now)?)
        };

        let report = ValidationReport {
            run_at: now,
            success: !unavailable,
            is_valid,
            tolerance_minor: tolerance,
            currencies,
            discrepancy_id,
        };
        info!(
            success = report.success,
            is_valid = ?report.is_valid,
            currencies = report.currencies.len(),
            discrepancy_id = ?report.discrepancy_id,
            "Balance validation finished"
        );
        Ok(report)
    }

    fn local_totals(&self) -> VibanResult<BTreeMap<String, LocalTotals>> {
        let (accounts, transactions) = self.db.read(|txn| {
            let accounts: Vec<StoredAccount> = txn.load_all()?;
            let transactions: Vec<StoredTransaction> = txn.load_all()?;
            Ok::<_, VibanError>((accounts, transactions))
        })?;

        let mut totals: BTreeMap<String, LocalTotals> = BTreeMap::new();
        for account in accounts
            .iter()
            .filter(|a| a.status == AccountStatus::Active)
        {
            let entry = totals
                .entry(account.currency.clone())
                .or_insert(LocalTotals {
                    account_count: 0,
                    balance_minor: 0,
                    unapplied_minor: 0,
                });
            entry.account_count += 1;
            entry.balance_minor = checked_total([entry.balance_minor, account.balance_minor])?;
            entry.unapplied_minor = checked_total([
                entry.unapplied_minor,
                unapplied_net(account, &transactions)?,
            ])?;
        }
        Ok(totals)
    }

    fn record_discrepancy(
        &self,
        currencies: Vec<CurrencyBalanceCheck>,
        now: DateTime<Utc>,
    ) -> VibanResult<String> {
        let discrepancy = StoredDiscrepancy {
            discrepancy_id: uuid::Uuid::new_v4().to_string(),
            detected_at: now,
            currencies,
            status: DiscrepancyStatus::Open,
            resolved_by: None,
            resolved_at: None,
            resolution_note: None,
        };

        self.db.write(|txn| {
            txn.store(&discrepancy)?;
            AuditEvent::new(AuditEventType::DiscrepancyDetected)
                .with_actor("balance_validator")
                .with_resource("discrepancy", &discrepancy.discrepancy_id)
                .with_details(json!({ "currencies": discrepancy.currencies }))
                .at(now)
                .record(txn)?;
            Ok::<_, VibanError>(())
        })?;

        for check in &discrepancy.currencies {
            error!(
                discrepancy_id = %discrepancy.discrepancy_id,
                currency = %check.currency,
                local_total_minor = check.local_total_minor,
                provider_total_minor = ?check.provider_total_minor,
                difference_minor = ?check.difference_minor,
                "Balance discrepancy detected"
            );
        }
        Ok(discrepancy.discrepancy_id)
    }
}

/// Close an OPEN discrepancy with the operator's note.
pub fn resolve_discrepancy(
    db: &LedgerDb,
    discrepancy_id: &str,
    admin_user_id: &str,
    note: &str,
    now: DateTime<Utc>,
) -> VibanResult<StoredDiscrepancy> {
    let resolved = db.write(|txn| {
        let mut discrepancy: StoredDiscrepancy = txn
            .load(discrepancy_id)?
            .ok_or_else(|| VibanError::not_found("discrepancy", discrepancy_id))?;
        if discrepancy.status != DiscrepancyStatus::Open {
            return Err(VibanError::already_processed("discrepancy", discrepancy_id));
        }
        discrepancy.status = DiscrepancyStatus::Resolved;
        discrepancy.resolved_by = Some(admin_user_id.to_string());
        discrepancy.resolved_at = Some(now);
        discrepancy.resolution_note = Some(note.to_string());
        txn.store(&discrepancy)?;

        AuditEvent::new(AuditEventType::DiscrepancyResolved)
            .with_actor(admin_user_id)
            .with_resource("discrepancy", discrepancy_id)
            .with_details(json!({ "note": note }))
            .at(now)
            .record(txn)?;
        Ok(discrepancy)
    })?;

    info!(discrepancy_id, admin_user_id, "Discrepancy resolved");
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::sandbox::{InjectedFailure, SandboxPartner};
    use crate::storage::{AccountRepository, DiscrepancyRepository};
    use crate::testing::{active_account, TestLedger};

    fn set_balance(db: &LedgerDb, account: &mut StoredAccount, balance_minor: i64) {
        account.balance_minor = balance_minor;
        db.write(|txn| txn.store(&*account)).unwrap();
    }

    #[tokio::test]
    async fn mismatch_is_reported_without_touching_balances() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let mut first = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let mut second = active_account(&ledger.db, "user-2", "EUR", "prov-2");
        set_balance(&ledger.db, &mut first, 600_000);
        set_balance(&ledger.db, &mut second, 400_000);

        let partner = SandboxPartner::new("partner");
        partner.set_aggregate("EUR", 1_005_000);

        let report = BalanceValidator::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.is_valid, Some(false));
        let eur = &report.currencies[0];
        assert_eq!(eur.local_total_minor, 1_000_000);
        assert_eq!(eur.difference_minor, Some(5_000));
        assert_eq!(eur.account_count, 2);

        let discrepancy = DiscrepancyRepository::new(&ledger.db)
            .get(report.discrepancy_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(discrepancy.status, DiscrepancyStatus::Open);

        let balance = AccountRepository::new(&ledger.db)
            .get(&first.account_id)
            .unwrap()
            .unwrap()
            .balance_minor;
        assert_eq!(balance, 600_000);
    }

    #[tokio::test]
    async fn matching_totals_are_valid() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let mut account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        set_balance(&ledger.db, &mut account, 2_500);

        let partner = SandboxPartner::new("partner");
        partner.set_aggregate("EUR", 2_500);

        let report = BalanceValidator::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.is_valid, Some(true));
        assert!(report.discrepancy_id.is_none());
        assert!(DiscrepancyRepository::new(&ledger.db).list(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn tolerance_absorbs_small_differences() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings {
            balance_tolerance_minor: 10,
            ..ReconciliationSettings::default()
        };
        active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let partner = SandboxPartner::new("partner");
        partner.set_aggregate("EUR", 10);

        let report = BalanceValidator::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.is_valid, Some(true));
    }

    #[tokio::test]
    async fn extreme_totals_do_not_wrap() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        let mut account = active_account(&ledger.db, "user-1", "EUR", "prov-1");
        set_balance(&ledger.db, &mut account, 1);
        let partner = SandboxPartner::new("partner");
        partner.set_aggregate("EUR", i64::MIN);

        let report = BalanceValidator::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await
            .unwrap();
        let eur = &report.currencies[0];
        assert_eq!(eur.status, CurrencyCheckStatus::Mismatched);
        assert_eq!(eur.difference_minor, None);
        assert!(eur.error.is_some());
        assert_eq!(report.is_valid, Some(false));

        let mut other = active_account(&ledger.db, "user-2", "EUR", "prov-2");
        set_balance(&ledger.db, &mut account, i64::MAX);
        set_balance(&ledger.db, &mut other, 1);
        let overflow = BalanceValidator::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await;
        assert!(matches!(overflow, Err(VibanError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn unreachable_partner_is_not_a_mismatch() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let partner = SandboxPartner::new("partner");
        partner.inject_failure(Some(InjectedFailure::Timeout));

        let report = BalanceValidator::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.is_valid, None);
        assert_eq!(report.currencies[0].status, CurrencyCheckStatus::Unavailable);
        assert!(report.discrepancy_id.is_none());
    }

    #[tokio::test]
    async fn discrepancy_resolves_once() {
        let ledger = TestLedger::new();
        let settings = ReconciliationSettings::default();
        active_account(&ledger.db, "user-1", "EUR", "prov-1");
        let partner = SandboxPartner::new("partner");
        partner.set_aggregate("EUR", 100);

        let report = BalanceValidator::new(&ledger.db, &partner, &settings)
            .run(Utc::now())
            .await
            .unwrap();
        let id = report.discrepancy_id.unwrap();

        let resolved =
            resolve_discrepancy(&ledger.db, &id, "admin-1", "partner fee", Utc::now()).unwrap();
        assert_eq!(resolved.status, DiscrepancyStatus::Resolved);
        assert_eq!(resolved.resolution_note.as_deref(), Some("partner fee"));

        let again = resolve_discrepancy(&ledger.db, &id, "admin-1", "again", Utc::now());
        assert!(matches!(again, Err(VibanError::AlreadyProcessed { .. })));
    }
}

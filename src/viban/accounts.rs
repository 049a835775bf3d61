// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Virtual IBAN account provisioning and lifecycle.
//!
//! ```text
//! PENDING ──sync──▶ ACTIVE ◀──reactivate── SUSPENDED
//!                     │ ──────suspend──────▶ │
//!                     └──close──▶ CLOSED ◀───┘
//! ```
//!
//! The `active_account` index holds at most one ACTIVE account per
//! (user, currency, provider); every transition into or out of ACTIVE links
//! or unlinks it in the same write transaction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use super::balance::{apply_balance_change, expected_partner_balance};
use super::ingest::ingest_transaction;
use super::error::{VibanError, VibanResult};
use crate::models::normalize_currency;
use crate::providers::{BankingPartner, PartnerAccountStatus};
use crate::storage::{
    active_account_key, AccountRepository, AccountStatus, AuditEvent, AuditEventType,
    BalanceEntryKind, LedgerRead, LedgerWrite, LedgerDb, StoredAccount, StoredTransaction,
    ACCOUNT_BY_PROVIDER_REF, ACTIVE_ACCOUNT,
};

/// Result of a sync-from-provider run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccountSyncOutcome {
    pub account: StoredAccount,
    /// Whether this sync promoted the account from PENDING to ACTIVE.
    pub activated: bool,
    pub provider_balance_minor: i64,
    /// Signed total of transactions still awaiting reconciliation.
    pub unapplied_net_minor: i64,
    /// Journal adjustment written by this sync (zero when already aligned).
    pub adjustment_minor: i64,
}

pub struct AccountService<'a> {
    db: &'a LedgerDb,
    partner: &'a dyn BankingPartner,
}

impl<'a> AccountService<'a> {
    pub fn new(db: &'a LedgerDb, partner: &'a dyn BankingPartner) -> Self {
        Self { db, partner }
    }

    /// Accounts owned by `user_id`.
    pub fn list_for_user(&self, user_id: &str) -> VibanResult<Vec<StoredAccount>> {
        Ok(AccountRepository::new(self.db).list_by_owner(user_id)?)
    }

    /// Ask the partner for a new Virtual IBAN and record it.
    pub async fn provision_account(
        &self,
        user_id: &str,
        currency: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredAccount> {
        let currency = normalize_currency(currency)?;
        let provider = self.partner.name().to_string();
        self.ensure_no_live_account(user_id, &currency, &provider)?;

        let opened = self.partner.open_account(user_id, &currency).await?;
        if opened.currency != currency {
            return Err(VibanError::Mismatch(format!(
                "partner opened a {} account for a {currency} request",
                opened.currency
            )));
        }

        let mut account = StoredAccount::new_pending(
            user_id.to_string(),
            provider.clone(),
            opened.provider_account_id.clone(),
            opened.iban,
            currency.clone(),
            now,
        );
        if opened.status == PartnerAccountStatus::Open {
            account.status = AccountStatus::Active;
        }

        self.db.write(|txn| {
            // Re-check under the write lock: a concurrent request may have won.
            if txn.lookup(ACTIVE_ACCOUNT, &account.active_key())?.is_some() {
                return Err(VibanError::Conflict(format!(
                    "user already has an active {currency} account"
                )));
            }
            if txn
                .lookup(ACCOUNT_BY_PROVIDER_REF, &account.provider_account_id)?
                .is_some()
            {
                return Err(VibanError::Conflict(format!(
                    "partner account {} is already registered",
                    account.provider_account_id
                )));
            }

            txn.store(&account)?;
            txn.link(
                ACCOUNT_BY_PROVIDER_REF,
                &account.provider_account_id,
                &account.account_id,
            )?;
            if account.status == AccountStatus::Active {
                txn.link(ACTIVE_ACCOUNT, &account.active_key(), &account.account_id)?;
            }

            AuditEvent::new(AuditEventType::AccountProvisioned)
                .with_actor(user_id)
                .with_resource("account", &account.account_id)
                .with_details(json!({
                    "currency": account.currency,
                    "status": account.status.as_str(),
                }))
                .at(now)
                .record(txn)?;
            Ok(())
        })?;

        info!(
            account_id = %account.account_id,
            user_id,
            currency = %account.currency,
            status = account.status.as_str(),
            "Virtual IBAN provisioned"
        );
        Ok(account)
    }

    fn ensure_no_live_account(&self, user_id: &str, currency: &str, provider: &str) -> VibanResult<()> {
        let live = AccountRepository::new(self.db)
            .list_by_owner(user_id)?
            .into_iter()
            .any(|a| {
                a.currency == currency
                    && a.provider == provider
                    && matches!(a.status, AccountStatus::Pending | AccountStatus::Active)
            });
        if live {
            return Err(VibanError::Conflict(format!(
                "user already has a pending or active {currency} account"
            )));
        }
        Ok(())
    }

    /// Refresh an account from the partner.
    ///
    /// Promotes PENDING to ACTIVE once the partner reports the account open,
    /// then aligns the cached balance with the partner balance through a
    /// `SyncAdjustment` journal entry.
    ///
    /// Every partner booking up to `now` is ingested first, so funds whose
    /// webhook has not arrived yet count as unapplied instead of being
    /// adjusted in and credited again when they reconcile. The adjustment is
    /// computed from the ledger state inside the write transaction.
    pub async fn sync_account(
        &self,
        account_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<AccountSyncOutcome> {
        let account = AccountRepository::new(self.db)
            .get(account_id)?
            .ok_or_else(|| VibanError::not_found("account", account_id))?;
        if account.status == AccountStatus::Closed {
            return Err(VibanError::AccountNotEligible {
                account_id: account_id.to_string(),
                status: account.status.as_str().to_string(),
            });
        }

        let remote = self.partner.get_account(&account.provider_account_id).await?;
        let booked = self
            .partner
            .list_transactions(&account.provider_account_id, account.created_at, now)
            .await?;
        let mut ingested = 0;
        for incoming in &booked {
            if ingest_transaction(self.db, incoming, now)?.is_new() {
                ingested += 1;
            }
        }
        if ingested > 0 {
            info!(account_id, ingested, "Sync ingested partner bookings missing locally");
        }

        let outcome = self.db.write(|txn| {
            let mut account: StoredAccount = txn
                .load(account_id)?
                .ok_or_else(|| VibanError::not_found("account", account_id))?;

            let mut activated = false;
            if account.status == AccountStatus::Pending && remote.status == PartnerAccountStatus::Open
            {
                let key = account.active_key();
                if txn.lookup(ACTIVE_ACCOUNT, &key)?.is_some() {
                    return Err(VibanError::Conflict(format!(
                        "user already has an active {} account",
                        account.currency
                    )));
                }
                account.status = AccountStatus::Active;
                txn.link(ACTIVE_ACCOUNT, &key, &account.account_id)?;
                activated = true;
            }

            let transactions: Vec<StoredTransaction> = txn.load_all()?;
            let (expected, unapplied) = expected_partner_balance(&account, &transactions, now)?;
            let adjustment = remote
                .balance_minor
                .checked_sub(expected)
                .ok_or_else(|| VibanError::InvalidAmount("balance overflow".to_string()))?;

            let sync_id = format!("sync:{}", uuid::Uuid::new_v4());
            if adjustment != 0 {
                apply_balance_change(
                    txn,
                    &mut account,
                    adjustment,
                    BalanceEntryKind::SyncAdjustment,
                    &sync_id,
                    now,
                )?;
            } else {
                account.last_balance_update = Some(now);
                account.updated_at = now;
                txn.store(&account)?;
            }

            AuditEvent::new(AuditEventType::BalanceSynced)
                .with_actor(actor)
                .with_resource("account", &account.account_id)
                .with_details(json!({
                    "provider_balance_minor": remote.balance_minor,
                    "unapplied_net_minor": unapplied,
                    "adjustment_minor": adjustment,
                }))
                .at(now)
                .record(txn)?;
            if activated {
                AuditEvent::new(AuditEventType::AccountActivated)
                    .with_actor(actor)
                    .with_resource("account", &account.account_id)
                    .at(now)
                    .record(txn)?;
            }

            Ok::<_, VibanError>(AccountSyncOutcome {
                account,
                activated,
                provider_balance_minor: remote.balance_minor,
                unapplied_net_minor: unapplied,
                adjustment_minor: adjustment,
            })
        })?;

        if outcome.adjustment_minor != 0 {
            tracing::warn!(
                account_id,
                adjustment_minor = outcome.adjustment_minor,
                "Balance adjusted from partner sync"
            );
        }
        info!(account_id, activated = outcome.activated, "Account synced");
        Ok(outcome)
    }

    /// Freeze an ACTIVE account. Frozen accounts receive no automatic matches.
    pub fn suspend_account(
        &self,
        account_id: &str,
        reason: &str,
        admin_user_id: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredAccount> {
        self.transition(account_id, admin_user_id, now, |txn, account| {
            if account.status != AccountStatus::Active {
                return Err(invalid_transition(account, "suspend"));
            }
            txn.unlink(ACTIVE_ACCOUNT, &account.active_key())?;
            account.status = AccountStatus::Suspended;
            account.suspension_reason = Some(reason.to_string());
            Ok(AuditEventType::AccountSuspended)
        })
    }

    /// Return a SUSPENDED account to ACTIVE.
    pub fn reactivate_account(
        &self,
        account_id: &str,
        admin_user_id: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredAccount> {
        self.transition(account_id, admin_user_id, now, |txn, account| {
            if account.status != AccountStatus::Suspended {
                return Err(invalid_transition(account, "reactivate"));
            }
            let key = active_account_key(&account.owner_user_id, &account.currency, &account.provider);
            if txn.lookup(ACTIVE_ACCOUNT, &key)?.is_some() {
                return Err(VibanError::Conflict(format!(
                    "user already has an active {} account",
                    account.currency
                )));
            }
            txn.link(ACTIVE_ACCOUNT, &key, &account.account_id)?;
            account.status = AccountStatus::Active;
            account.suspension_reason = None;
            Ok(AuditEventType::AccountReactivated)
        })
    }

    /// Soft-close an account with a zero balance.
    pub fn close_account(
        &self,
        account_id: &str,
        admin_user_id: &str,
        now: DateTime<Utc>,
    ) -> VibanResult<StoredAccount> {
        self.transition(account_id, admin_user_id, now, |txn, account| {
            if account.status == AccountStatus::Closed {
                return Err(invalid_transition(account, "close"));
            }
            if account.balance_minor != 0 {
                return Err(VibanError::InvalidState(format!(
                    "account {} still holds a balance of {} minor units",
                    account.account_id, account.balance_minor
                )));
            }
            if account.status == AccountStatus::Active {
                txn.unlink(ACTIVE_ACCOUNT, &account.active_key())?;
            }
            account.status = AccountStatus::Closed;
            account.closed_at = Some(now);
            Ok(AuditEventType::AccountClosed)
        })
    }

    fn transition(
        &self,
        account_id: &str,
        admin_user_id: &str,
        now: DateTime<Utc>,
        apply: impl FnOnce(&redb::WriteTransaction, &mut StoredAccount) -> VibanResult<AuditEventType>,
    ) -> VibanResult<StoredAccount> {
        let account = self.db.write(|txn| {
            let mut account: StoredAccount = txn
                .load(account_id)?
                .ok_or_else(|| VibanError::not_found("account", account_id))?;
            let previous = account.status;
            let event_type = apply(txn, &mut account)?;
            account.updated_at = now;
            txn.store(&account)?;

            AuditEvent::new(event_type)
                .with_actor(admin_user_id)
                .with_resource("account", account_id)
                .with_details(json!({
                    "from": previous.as_str(),
                    "to": account.status.as_str(),
                    "reason": account.suspension_reason,
                }))
                .at(now)
                .record(txn)?;
            Ok::<_, VibanError>(account)
        })?;

        info!(
            account_id,
            admin_user_id,
            status = account.status.as_str(),
            "Account status changed"
        );
        Ok(account)
    }
}

fn invalid_transition(account: &StoredAccount, action: &str) -> VibanError {
    VibanError::InvalidState(format!(
        "cannot {action} account {} in status {}",
        account.account_id,
        account.status.as_str()
    ))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Virtual IBAN account records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::ledger_db::{
    LedgerDb, LedgerRead, LedgerResult, Record, RecordTable, ACCOUNTS, ACCOUNT_BY_PROVIDER_REF,
    ACTIVE_ACCOUNT,
};

/// Lifecycle status of a Virtual IBAN account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Provisioned locally, not yet confirmed by the partner.
    Pending,
    /// Accepting inbound payments.
    Active,
    /// Frozen by an administrator.
    Suspended,
    /// Permanently closed.
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Closed => "CLOSED",
        }
    }
}

/// Persisted Virtual IBAN account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredAccount {
    /// Internal account id.
    pub account_id: String,
    /// Owning user.
    pub owner_user_id: String,
    /// Banking partner name.
    pub provider: String,
    /// The partner's identifier for this account.
    pub provider_account_id: String,
    /// IBAN issued by the partner.
    pub iban: String,
    /// ISO 4217 currency code.
    pub currency: String,
    pub status: AccountStatus,
    /// Cached balance in minor units.
    pub balance_minor: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_balance_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspension_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Record for StoredAccount {
    const TABLE: RecordTable = ACCOUNTS;

    fn key(&self) -> &str {
        &self.account_id
    }
}

impl StoredAccount {
    /// Build a freshly provisioned account awaiting partner confirmation.
    pub fn new_pending(
        owner_user_id: String,
        provider: String,
        provider_account_id: String,
        iban: String,
        currency: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: uuid::Uuid::new_v4().to_string(),
            owner_user_id,
            provider,
            provider_account_id,
            iban,
            currency,
            status: AccountStatus::Pending,
            balance_minor: 0,
            last_balance_update: None,
            suspension_reason: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Key of the `active_account` index for this account.
    pub fn active_key(&self) -> String {
        active_account_key(&self.owner_user_id, &self.currency, &self.provider)
    }
}

/// Key enforcing at most one ACTIVE account per (user, currency, provider).
pub fn active_account_key(user_id: &str, currency: &str, provider: &str) -> String {
    format!("{user_id}|{currency}|{provider}")
}

/// Read-side queries over accounts.
pub struct AccountRepository<'a> {
    db: &'a LedgerDb,
}

impl<'a> AccountRepository<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    /// Get an account by id.
    pub fn get(&self, account_id: &str) -> LedgerResult<Option<StoredAccount>> {
        self.db.read(|txn| txn.load(account_id))
    }

    /// Find an account by the partner's account identifier.
    pub fn find_by_provider_ref(
        &self,
        provider_account_id: &str,
    ) -> LedgerResult<Option<StoredAccount>> {
        self.db
            .read(|txn| txn.load_by_index(ACCOUNT_BY_PROVIDER_REF, provider_account_id))
    }

    /// Find the ACTIVE account for a (user, currency, provider) triple.
    pub fn find_active(
        &self,
        user_id: &str,
        currency: &str,
        provider: &str,
    ) -> LedgerResult<Option<StoredAccount>> {
        let key = active_account_key(user_id, currency, provider);
        self.db.read(|txn| txn.load_by_index(ACTIVE_ACCOUNT, &key))
    }

    /// List accounts owned by a user, oldest first.
    pub fn list_by_owner(&self, user_id: &str) -> LedgerResult<Vec<StoredAccount>> {
        let mut accounts: Vec<StoredAccount> = self
            .list_all()?
            .into_iter()
            .filter(|a| a.owner_user_id == user_id)
            .collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(accounts)
    }

    /// List every account.
    pub fn list_all(&self) -> LedgerResult<Vec<StoredAccount>> {
        self.db.read(|txn| txn.load_all())
    }

    /// List accounts in any of the given statuses.
    pub fn list_with_status(&self, statuses: &[AccountStatus]) -> LedgerResult<Vec<StoredAccount>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|a| statuses.contains(&a.status))
            .collect())
    }
}

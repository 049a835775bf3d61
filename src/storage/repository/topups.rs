// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Top-up request records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::ledger_db::{
    LedgerDb, LedgerRead, LedgerResult, Record, RecordTable, PENDING_TOPUP_BY_ACCOUNT, TOPUPS,
    TOPUP_BY_REFERENCE,
};

/// Top-up request lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopUpStatus {
    /// Waiting for the user's bank transfer.
    Pending,
    /// Paid; linked to exactly one transaction.
    Completed,
    /// Not paid before `expires_at`.
    Expired,
    /// Withdrawn by the owner.
    Cancelled,
}

impl TopUpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Persisted top-up request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredTopUp {
    pub request_id: String,
    /// Account the user will transfer into.
    pub virtual_iban_id: String,
    pub owner_user_id: String,
    /// Expected amount in minor units.
    pub amount_minor: i64,
    pub currency: String,
    /// Reference the user must quote on the transfer.
    pub reference: String,
    /// Canonical form of `reference` used for matching.
    pub normalized_reference: String,
    pub status: TopUpStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Transaction that paid this request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Record for StoredTopUp {
    const TABLE: RecordTable = TOPUPS;

    fn key(&self) -> &str {
        &self.request_id
    }
}

impl StoredTopUp {
    /// Key of the `pending_topup_by_account` index for this request.
    pub fn pending_key(&self) -> String {
        format!("{}|{}", self.virtual_iban_id, self.request_id)
    }

    /// Whether the request may still be paid at `at`.
    pub fn is_payable_at(&self, at: DateTime<Utc>) -> bool {
        self.status == TopUpStatus::Pending && self.expires_at >= at
    }
}

/// Read-side queries over top-up requests.
pub struct TopUpRepository<'a> {
    db: &'a LedgerDb,
}

impl<'a> TopUpRepository<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    pub fn get(&self, request_id: &str) -> LedgerResult<Option<StoredTopUp>> {
        self.db.read(|txn| txn.load(request_id))
    }

    /// Find a request by its normalized reference.
    pub fn find_by_reference(&self, normalized: &str) -> LedgerResult<Option<StoredTopUp>> {
        self.db
            .read(|txn| txn.load_by_index(TOPUP_BY_REFERENCE, normalized))
    }

    /// Requests created by a user, newest first.
    pub fn list_by_owner(&self, user_id: &str) -> LedgerResult<Vec<StoredTopUp>> {
        let all: Vec<StoredTopUp> = self.db.read(|txn| txn.load_all())?;
        let mut requests: Vec<StoredTopUp> = all
            .into_iter()
            .filter(|r| r.owner_user_id == user_id)
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    /// PENDING requests whose deadline passed before `now`.
    pub fn list_overdue(&self, now: DateTime<Utc>) -> LedgerResult<Vec<StoredTopUp>> {
        let pending: Vec<StoredTopUp> = self
            .db
            .read(|txn| txn.load_by_prefix(PENDING_TOPUP_BY_ACCOUNT, ""))?;
        Ok(pending
            .into_iter()
            .filter(|r| r.status == TopUpStatus::Pending && r.expires_at < now)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(expires_at: DateTime<Utc>) -> StoredTopUp {
        let now = Utc::now();
        StoredTopUp {
            request_id: "r1".into(),
            virtual_iban_id: "acc-1".into(),
            owner_user_id: "user-1".into(),
            amount_minor: 10_000,
            currency: "EUR".into(),
            reference: "TU-ABC123".into(),
            normalized_reference: "tuabc123".into(),
            status: TopUpStatus::Pending,
            created_at: now,
            expires_at,
            updated_at: now,
            transaction_id: None,
            completed_at: None,
            expired_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn payable_until_deadline_inclusive() {
        let deadline = Utc::now();
        let r = request(deadline);
        assert!(r.is_payable_at(deadline - Duration::minutes(1)));
        assert!(r.is_payable_at(deadline));
        assert!(!r.is_payable_at(deadline + Duration::seconds(1)));
    }

    #[test]
    fn overdue_listing_skips_future_deadlines() {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        let now = Utc::now();
        let mut late = request(now - Duration::hours(1));
        late.request_id = "late".into();
        let mut fresh = request(now + Duration::hours(1));
        fresh.request_id = "fresh".into();

        db.write(|txn| {
            use crate::storage::ledger_db::LedgerWrite;
            for r in [&late, &fresh] {
                txn.store(r)?;
                txn.link(PENDING_TOPUP_BY_ACCOUNT, &r.pending_key(), &r.request_id)?;
            }
            Ok::<_, crate::storage::LedgerError>(())
        })
        .unwrap();

        let overdue = TopUpRepository::new(&db).list_overdue(now).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].request_id, "late");
    }
}

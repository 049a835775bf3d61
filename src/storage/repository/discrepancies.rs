// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance discrepancies found by the integrity validator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::ledger_db::{
    LedgerDb, LedgerRead, LedgerResult, Record, RecordTable, DISCREPANCIES,
};

/// Outcome of comparing one currency against the partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyCheckStatus {
    Matched,
    Mismatched,
    /// The partner aggregate could not be fetched.
    Unavailable,
}

/// Per-currency comparison between local and partner totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CurrencyBalanceCheck {
    pub currency: String,
    /// Number of ACTIVE accounts included.
    pub account_count: usize,
    /// Sum of cached balances.
    pub local_total_minor: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_total_minor: Option<i64>,
    /// `provider - local`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difference_minor: Option<i64>,
    /// Signed total of ingested transactions not yet applied to balances.
    pub unapplied_net_minor: i64,
    pub status: CurrencyCheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyStatus {
    Open,
    Resolved,
}

/// A persisted mismatch awaiting investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredDiscrepancy {
    pub discrepancy_id: String,
    pub detected_at: DateTime<Utc>,
    /// Only the mismatched currencies of the run.
    pub currencies: Vec<CurrencyBalanceCheck>,
    pub status: DiscrepancyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

impl Record for StoredDiscrepancy {
    const TABLE: RecordTable = DISCREPANCIES;

    fn key(&self) -> &str {
        &self.discrepancy_id
    }
}

pub struct DiscrepancyRepository<'a> {
    db: &'a LedgerDb,
}

impl<'a> DiscrepancyRepository<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    pub fn get(&self, discrepancy_id: &str) -> LedgerResult<Option<StoredDiscrepancy>> {
        self.db.read(|txn| txn.load(discrepancy_id))
    }

    /// Discrepancies, newest first, optionally filtered by status.
    pub fn list(&self, status: Option<DiscrepancyStatus>) -> LedgerResult<Vec<StoredDiscrepancy>> {
        let all: Vec<StoredDiscrepancy> = self.db.read(|txn| txn.load_all())?;
        let mut found: Vec<StoredDiscrepancy> = all
            .into_iter()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .collect();
        found.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(found)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only balance journal.
//!
//! Every change to an account's cached balance is written alongside an entry
//! in this journal, inside the same write transaction. Replaying the journal
//! must reproduce the cached balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::ledger_db::{
    LedgerDb, LedgerRead, LedgerResult, Record, RecordTable, BALANCE_ENTRIES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BalanceEntryKind {
    /// Reconciled inbound payment.
    Credit,
    /// Outbound payment.
    Debit,
    /// Correction after a partner balance sync.
    SyncAdjustment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BalanceEntry {
    pub entry_id: String,
    pub account_id: String,
    pub kind: BalanceEntryKind,
    /// Signed change in minor units.
    pub delta_minor: i64,
    pub balance_after_minor: i64,
    /// Transaction id, or the sync run that produced the adjustment.
    pub source_id: String,
    pub recorded_at: DateTime<Utc>,
}

impl Record for BalanceEntry {
    const TABLE: RecordTable = BALANCE_ENTRIES;

    fn key(&self) -> &str {
        &self.entry_id
    }
}

pub struct BalanceEntryRepository<'a> {
    db: &'a LedgerDb,
}

impl<'a> BalanceEntryRepository<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    /// Journal of one account in recording order.
    pub fn list_by_account(&self, account_id: &str) -> LedgerResult<Vec<BalanceEntry>> {
        let all: Vec<BalanceEntry> = self.db.read(|txn| txn.load_all())?;
        let mut entries: Vec<BalanceEntry> = all
            .into_iter()
            .filter(|e| e.account_id == account_id)
            .collect();
        entries.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(entries)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ingested banking transactions and their reconciliation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::ledger_db::{
    LedgerDb, LedgerRead, LedgerResult, Record, RecordTable, TRANSACTIONS,
    TRANSACTION_BY_EXTERNAL_ID,
};

/// Money flow direction from the account's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Credit,
    Debit,
}

/// Reconciliation status of a transaction.
///
/// Transitions only move forward:
/// `PENDING → VOP_HELD → RECONCILED | FAILED` and `PENDING → RECONCILED | FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    /// Awaiting reconciliation.
    Pending,
    /// Held for payee verification review.
    VopHeld,
    /// Linked to its target (or applied as an outflow).
    Reconciled,
    /// Rejected; never affects the balance.
    Failed,
}

impl TxStatus {
    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    pub fn can_transition_to(self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Pending, VopHeld) | (Pending, Reconciled) | (Pending, Failed)
                | (VopHeld, Reconciled)
                | (VopHeld, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Reconciled | TxStatus::Failed)
    }
}

/// Verification-of-Payee outcome reported by the partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VopStatus {
    Match,
    CloseMatch,
    NoMatch,
    ImpossibleMatch,
}

impl VopStatus {
    /// Whether this outcome holds the transaction for manual review.
    pub fn requires_review(self) -> bool {
        !matches!(self, VopStatus::Match)
    }
}

/// Kind of entity a credit can be reconciled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Order,
    TopUpRequest,
}

/// Reference to a reconciliation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TargetRef {
    pub target_type: TargetType,
    pub target_id: String,
}

impl TargetRef {
    pub fn order(id: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::Order,
            target_id: id.into(),
        }
    }

    pub fn top_up(id: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::TopUpRequest,
            target_id: id.into(),
        }
    }
}

/// How a transaction reached RECONCILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ReconciledBy {
    /// Payment reference matched a pending request.
    Reference,
    /// Unique amount + owner + time-window candidate.
    AmountOwnerWindow,
    /// Linked by an administrator.
    Manual { admin_user_id: String },
    /// Debit applied straight to the balance.
    Outflow,
}

/// Why a transaction is sitting in the manual review queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewNote {
    /// No pending request matched.
    NoCandidate,
    /// More than one pending request matched by amount, owner and window.
    AmbiguousCandidates { candidates: Vec<TargetRef> },
    /// The reference resolved to a request that is no longer payable.
    ReferenceTargetNotPending { target: TargetRef, status: String },
    /// The reference resolved to a request that disagrees with the payment.
    ReferenceTargetMismatch { target: TargetRef, detail: String },
    /// Held until an administrator reviews the payee verification result.
    AwaitingVopReview,
    /// The account cannot take automatic reconciliations right now.
    AccountNotActive { status: String },
    /// Booked in a currency other than the account's; never applied to its balance.
    CurrencyMismatch { expected: String, actual: String },
}

/// Persisted transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredTransaction {
    /// Internal transaction id.
    pub transaction_id: String,
    /// The partner's transaction id (unique).
    pub external_transaction_id: String,
    /// Account the transaction was booked on.
    pub virtual_iban_id: String,
    /// Positive amount in minor units.
    pub amount_minor: i64,
    pub currency: String,
    pub direction: Direction,
    /// Payment reference as sent by the payer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    /// Partner-supplied correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_iban: Option<String>,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vop_status: Option<VopStatus>,
    /// `None` until an administrator reviews a VOP hold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vop_approved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vop_reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vop_reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled_top_up_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled_by: Option<ReconciledBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<ReviewNote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the partner booked the transaction.
    pub booked_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for StoredTransaction {
    const TABLE: RecordTable = TRANSACTIONS;

    fn key(&self) -> &str {
        &self.transaction_id
    }
}

impl StoredTransaction {
    /// Amount with its sign: credits positive, debits negative.
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Credit => self.amount_minor,
            Direction::Debit => -self.amount_minor,
        }
    }

    /// Whether automatic or manual reconciliation may act on this transaction.
    pub fn is_eligible(&self) -> bool {
        match self.status {
            TxStatus::Pending => true,
            TxStatus::VopHeld => self.vop_approved == Some(true),
            TxStatus::Reconciled | TxStatus::Failed => false,
        }
    }

    /// Whether the transaction has been linked to a target.
    pub fn is_linked(&self) -> bool {
        self.reconciled_order_id.is_some() || self.reconciled_top_up_request_id.is_some()
    }
}

/// Read-side queries over transactions.
pub struct TransactionRepository<'a> {
    db: &'a LedgerDb,
}

impl<'a> TransactionRepository<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    pub fn get(&self, transaction_id: &str) -> LedgerResult<Option<StoredTransaction>> {
        self.db.read(|txn| txn.load(transaction_id))
    }

    /// Find a transaction by the partner's id.
    pub fn find_by_external_id(
        &self,
        external_transaction_id: &str,
    ) -> LedgerResult<Option<StoredTransaction>> {
        self.db
            .read(|txn| txn.load_by_index(TRANSACTION_BY_EXTERNAL_ID, external_transaction_id))
    }

    /// Transactions of one account, newest booking first.
    pub fn list_by_account(&self, account_id: &str) -> LedgerResult<Vec<StoredTransaction>> {
        let mut transactions = self.filtered(|tx| tx.virtual_iban_id == account_id)?;
        transactions.sort_by(|a, b| b.booked_at.cmp(&a.booked_at));
        Ok(transactions)
    }

    /// Credits still waiting for reconciliation, oldest first.
    pub fn list_unreconciled(&self) -> LedgerResult<Vec<StoredTransaction>> {
        let mut transactions = self.filtered(|tx| {
            tx.direction == Direction::Credit
                && matches!(tx.status, TxStatus::Pending | TxStatus::VopHeld)
        })?;
        transactions.sort_by(|a, b| a.booked_at.cmp(&b.booked_at));
        Ok(transactions)
    }

    /// Every PENDING or VOP_HELD transaction in either direction, oldest first.
    pub fn list_open(&self) -> LedgerResult<Vec<StoredTransaction>> {
        let mut transactions =
            self.filtered(|tx| matches!(tx.status, TxStatus::Pending | TxStatus::VopHeld))?;
        transactions.sort_by(|a, b| a.booked_at.cmp(&b.booked_at));
        Ok(transactions)
    }

    /// VOP holds not yet reviewed by an administrator, oldest first.
    pub fn list_vop_queue(&self) -> LedgerResult<Vec<StoredTransaction>> {
        let mut transactions =
            self.filtered(|tx| tx.status == TxStatus::VopHeld && tx.vop_approved.is_none())?;
        transactions.sort_by(|a, b| a.booked_at.cmp(&b.booked_at));
        Ok(transactions)
    }

    fn filtered(
        &self,
        keep: impl Fn(&StoredTransaction) -> bool,
    ) -> LedgerResult<Vec<StoredTransaction>> {
        let all: Vec<StoredTransaction> = self.db.read(|txn| txn.load_all())?;
        Ok(all.into_iter().filter(|tx| keep(tx)).collect())
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the ledger database.
//!
//! Each module defines the persisted record for one entity type and a
//! repository for read-side queries. State transitions are written by the
//! reconciliation services inside a single [`LedgerDb::write`] call.
//!
//! [`LedgerDb::write`]: crate::storage::LedgerDb::write

pub mod accounts;
pub mod balance_entries;
pub mod discrepancies;
pub mod orders;
pub mod topups;
pub mod transactions;

pub use accounts::{active_account_key, AccountRepository, AccountStatus, StoredAccount};
pub use balance_entries::{BalanceEntry, BalanceEntryKind, BalanceEntryRepository};
pub use discrepancies::{
    CurrencyBalanceCheck, CurrencyCheckStatus, DiscrepancyRepository, DiscrepancyStatus,
    StoredDiscrepancy,
};
pub use orders::{OrderRepository, OrderStatus, StoredOrder, StoredPayIn};
pub use topups::{StoredTopUp, TopUpRepository, TopUpStatus};
pub use transactions::{
    Direction, ReconciledBy, ReviewNote, StoredTransaction, TargetRef, TargetType,
    TransactionRepository, TxStatus, VopStatus,
};

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Storage
//!
//! All state lives in a single redb database file under `DATA_DIR`:
//!
//! ```text
//! {DATA_DIR}/
//!   ledger.redb   # accounts, transactions, requests, journal, audit log
//! ```
//!
//! Record and index tables are described in [`ledger_db`]. Repositories in
//! [`repository`] wrap read transactions; multi-record updates are written
//! through [`LedgerDb::write`] so each state transition commits atomically.

pub mod audit;
pub mod ledger_db;
pub mod repository;

pub use audit::{AuditEvent, AuditEventType, AuditRepository};
pub use ledger_db::{
    LedgerDb, LedgerError, LedgerRead, LedgerResult, LedgerWrite, ACCOUNT_BY_PROVIDER_REF,
    ACTIVE_ACCOUNT, AWAITING_ORDER_BY_OWNER, ORDER_BY_REFERENCE, PENDING_TOPUP_BY_ACCOUNT,
    TOPUP_BY_REFERENCE, TRANSACTION_BY_EXTERNAL_ID,
};
pub use repository::*;

/// File name of the ledger database inside the data directory.
pub const LEDGER_FILE: &str = "ledger.redb";

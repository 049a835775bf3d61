// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Virtual IBAN Reconciliation
//!
//! Turns partner bank events into internal state:
//!
//! ```text
//! webhook / poller ─► ingest ─► reconcile ─► top-up COMPLETED / order PAID
//!                                   │
//!                                   └─► review queue (no match, ambiguous, VOP hold)
//! ```
//!
//! The balance validator runs independently against the partner aggregate.
//! Every operation takes `now` explicitly so schedules and tests control time.

pub mod accounts;
pub mod balance;
pub mod error;
pub mod ingest;
pub mod integrity;
pub mod matcher;
pub mod orders;
pub mod payment_sync;
pub mod reconcile;
pub mod reference;
pub mod topups;
pub mod vop;

pub use accounts::{AccountService, AccountSyncOutcome};
pub use balance::{audit_balance, BalanceAudit};
pub use error::{VibanError, VibanResult};
pub use ingest::{ingest_transaction, IngestOutcome};
pub use integrity::{resolve_discrepancy, BalanceValidator, ValidationReport};
pub use matcher::{find_match, MatchOutcome, MatchTarget};
pub use orders::{register_order, NewOrder};
pub use payment_sync::{PaymentSync, SyncReport};
pub use reconcile::{ReconcileOutcome, Reconciler, SweepSummary};
pub use reference::{normalize_reference, TOPUP_REFERENCE_PREFIX};
pub use topups::{ExpirySummary, TopUpManager};
pub use vop::VopReview;

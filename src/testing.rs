// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit tests.

use chrono::{DateTime, Utc};

use crate::providers::PartnerTransaction;
use crate::storage::{
    AccountStatus, Direction, LedgerDb, LedgerError, LedgerWrite, OrderStatus, StoredAccount,
    StoredOrder, ACCOUNT_BY_PROVIDER_REF, ACTIVE_ACCOUNT, AWAITING_ORDER_BY_OWNER,
    ORDER_BY_REFERENCE,
};
use crate::viban::reference::normalize_reference;

pub const PROVIDER: &str = "partner";

/// A ledger in a throw-away directory.
pub struct TestLedger {
    pub db: LedgerDb,
    _dir: tempfile::TempDir,
}

impl TestLedger {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        Self { db, _dir: dir }
    }
}

/// Store an ACTIVE account with both indexes linked.
pub fn active_account(db: &LedgerDb, user: &str, currency: &str, provider_ref: &str) -> StoredAccount {
    let mut account = StoredAccount::new_pending(
        user.to_string(),
        PROVIDER.to_string(),
        provider_ref.to_string(),
        format!("DE00{provider_ref}"),
        currency.to_string(),
        Utc::now(),
    );
    account.status = AccountStatus::Active;
    db.write(|txn| {
        txn.store(&account)?;
        txn.link(ACCOUNT_BY_PROVIDER_REF, provider_ref, &account.account_id)?;
        txn.link(ACTIVE_ACCOUNT, &account.active_key(), &account.account_id)
    })
    .unwrap();
    account
}

/// Store an order awaiting payment.
pub fn awaiting_order(
    db: &LedgerDb,
    user: &str,
    reference: &str,
    total_minor: i64,
    currency: &str,
    created_at: DateTime<Utc>,
) -> StoredOrder {
    let order = StoredOrder {
        order_id: uuid::Uuid::new_v4().to_string(),
        owner_user_id: user.to_string(),
        payment_reference: reference.to_string(),
        normalized_reference: normalize_reference(reference),
        total_fiat_minor: total_minor,
        currency_code: currency.to_string(),
        status: OrderStatus::AwaitingPayment,
        created_at,
        updated_at: created_at,
        virtual_iban_id: None,
        pay_in_id: None,
        paid_transaction_id: None,
        paid_at: None,
    };
    db.write(|txn| {
        txn.store(&order)?;
        txn.link(ORDER_BY_REFERENCE, &order.normalized_reference, &order.order_id)?;
        txn.link(AWAITING_ORDER_BY_OWNER, &order.awaiting_key(), &order.order_id)?;
        Ok::<_, LedgerError>(())
    })
    .unwrap();
    order
}

/// A partner-reported credit with no reference or VOP flag.
pub fn credit(
    external_id: &str,
    provider_ref: &str,
    amount_minor: i64,
    booked_at: DateTime<Utc>,
) -> PartnerTransaction {
    PartnerTransaction {
        external_transaction_id: external_id.to_string(),
        provider_account_id: provider_ref.to_string(),
        amount_minor,
        currency: "EUR".to_string(),
        direction: Direction::Credit,
        reference: None,
        correlation_id: None,
        counterparty_name: Some("Jane Payer".to_string()),
        counterparty_iban: None,
        vop_status: None,
        booked_at,
    }
}

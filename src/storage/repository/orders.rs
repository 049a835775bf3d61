// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Orders paid by bank transfer, and the pay-in records that settle them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::ledger_db::{
    LedgerDb, LedgerRead, LedgerResult, Record, RecordTable, ORDERS, ORDER_BY_REFERENCE, PAYINS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingPayment,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Persisted order awaiting (or settled by) a bank transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredOrder {
    pub order_id: String,
    pub owner_user_id: String,
    /// Reference quoted on the transfer.
    pub payment_reference: String,
    pub normalized_reference: String,
    /// Order total in minor units.
    pub total_fiat_minor: i64,
    pub currency_code: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Account the order was paid into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_iban_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_in_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
}

impl StoredOrder {
    /// Key of the `awaiting_order_by_owner` index for this order.
    pub fn awaiting_key(&self) -> String {
        format!("{}|{}", self.owner_user_id, self.order_id)
    }
}

impl Record for StoredOrder {
    const TABLE: RecordTable = ORDERS;

    fn key(&self) -> &str {
        &self.order_id
    }
}

/// Receipt of funds against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredPayIn {
    pub pay_in_id: String,
    pub order_id: String,
    pub transaction_id: String,
    pub virtual_iban_id: String,
    pub amount_minor: i64,
    pub currency: String,
    /// Booking time of the paying transaction.
    pub received_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl Record for StoredPayIn {
    const TABLE: RecordTable = PAYINS;

    fn key(&self) -> &str {
        &self.pay_in_id
    }
}

pub struct OrderRepository<'a> {
    db: &'a LedgerDb,
}

impl<'a> OrderRepository<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    pub fn get(&self, order_id: &str) -> LedgerResult<Option<StoredOrder>> {
        self.db.read(|txn| txn.load(order_id))
    }

    pub fn find_by_reference(&self, normalized: &str) -> LedgerResult<Option<StoredOrder>> {
        self.db
            .read(|txn| txn.load_by_index(ORDER_BY_REFERENCE, normalized))
    }

    pub fn get_pay_in(&self, pay_in_id: &str) -> LedgerResult<Option<StoredPayIn>> {
        self.db.read(|txn| txn.load(pay_in_id))
    }
}

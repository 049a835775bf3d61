// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Registration of payable orders.
//!
//! Orders are created and priced elsewhere; this module only records what the
//! reconciler needs to match a pay-in against them.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use super::error::{VibanError, VibanResult};
use super::reference::normalize_reference;
use crate::models::normalize_currency;
use crate::storage::{
    AuditEvent, AuditEventType, LedgerDb, LedgerRead, LedgerWrite, OrderStatus, StoredOrder,
    AWAITING_ORDER_BY_OWNER, ORDER_BY_REFERENCE, TOPUP_BY_REFERENCE,
};

/// A payable order as announced by the order system.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub owner_user_id: String,
    pub payment_reference: String,
    pub total_fiat_minor: i64,
    pub currency_code: String,
}

/// Record an order in AWAITING_PAYMENT.
///
/// The payment reference must be unique across orders and top-up requests
/// once normalized, otherwise a pay-in could resolve to two targets.
pub fn register_order(
    db: &LedgerDb,
    new_order: NewOrder,
    actor: &str,
    now: DateTime<Utc>,
) -> VibanResult<StoredOrder> {
    if new_order.total_fiat_minor <= 0 {
        return Err(VibanError::InvalidAmount(
            "order total must be greater than zero".to_string(),
        ));
    }
    let currency = normalize_currency(&new_order.currency_code)?;
    let normalized = normalize_reference(&new_order.payment_reference);
    if normalized.is_empty() {
        return Err(VibanError::InvalidReference(
            "payment reference has no alphanumeric characters".to_string(),
        ));
    }

    let order = db.write(|txn| {
        if txn.lookup(ORDER_BY_REFERENCE, &normalized)?.is_some()
            || txn.lookup(TOPUP_BY_REFERENCE, &normalized)?.is_some()
        {
            return Err(VibanError::Conflict(format!(
                "payment reference {} is already in use",
                new_order.payment_reference
            )));
        }

        let order = StoredOrder {
            order_id: uuid::Uuid::new_v4().to_string(),
            owner_user_id: new_order.owner_user_id.clone(),
            payment_reference: new_order.payment_reference.clone(),
            normalized_reference: normalized.clone(),
            total_fiat_minor: new_order.total_fiat_minor,
            currency_code: currency.clone(),
            status: OrderStatus::AwaitingPayment,
            created_at: now,
            updated_at: now,
            virtual_iban_id: None,
            pay_in_id: None,
            paid_transaction_id: None,
            paid_at: None,
        };
        txn.store(&order)?;
        txn.link(ORDER_BY_REFERENCE, &normalized, &order.order_id)?;
        txn.link(AWAITING_ORDER_BY_OWNER, &order.awaiting_key(), &order.order_id)?;

        AuditEvent::new(AuditEventType::OrderRegistered)
            .with_actor(actor)
            .with_resource("order", &order.order_id)
            .with_details(json!({
                "owner_user_id": order.owner_user_id,
                "payment_reference": order.payment_reference,
                "total_fiat_minor": order.total_fiat_minor,
                "currency_code": order.currency_code,
            }))
            .at(now)
            .record(txn)?;
        Ok(order)
    })?;

    info!(
        order_id = %order.order_id,
        payment_reference = %order.payment_reference,
        total_fiat_minor = order.total_fiat_minor,
        "Order registered"
    );
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OrderRepository;
    use crate::testing::TestLedger;

    fn order(reference: &str, total: i64) -> NewOrder {
        NewOrder {
            owner_user_id: "user-1".to_string(),
            payment_reference: reference.to_string(),
            total_fiat_minor: total,
            currency_code: "eur".to_string(),
        }
    }

    #[test]
    fn registered_order_is_found_by_normalized_reference() {
        let ledger = TestLedger::new();
        let stored = register_order(&ledger.db, order("ORD-2026-001", 4_999), "admin-1", Utc::now())
            .unwrap();
        assert_eq!(stored.status, OrderStatus::AwaitingPayment);
        assert_eq!(stored.currency_code, "EUR");

        let found = OrderRepository::new(&ledger.db)
            .find_by_reference("ord2026001")
            .unwrap()
            .unwrap();
        assert_eq!(found.order_id, stored.order_id);
    }

    #[test]
    fn reference_collision_is_rejected() {
        let ledger = TestLedger::new();
        register_order(&ledger.db, order("ORD-1", 100), "admin-1", Utc::now()).unwrap();
        let again = register_order(&ledger.db, order("ord 1", 200), "admin-1", Utc::now());
        assert!(matches!(again, Err(VibanError::Conflict(_))));
    }

    #[test]
    fn invalid_orders_are_rejected() {
        let ledger = TestLedger::new();
        assert!(matches!(
            register_order(&ledger.db, order("ORD-1", 0), "admin-1", Utc::now()),
            Err(VibanError::InvalidAmount(_))
        ));
        assert!(matches!(
            register_order(&ledger.db, order("--", 100), "admin-1", Utc::now()),
            Err(VibanError::InvalidReference(_))
        ));
    }
}

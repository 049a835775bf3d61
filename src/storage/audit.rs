// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for balance-affecting and administrative operations.
//!
//! Events are appended inside the same write transaction as the state change
//! they describe, so the log never disagrees with the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ledger_db::{
    LedgerDb, LedgerRead, LedgerResult, LedgerWrite, Record, RecordTable, AUDIT_EVENTS,
};

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Account events
    AccountProvisioned,
    AccountActivated,
    AccountSuspended,
    AccountReactivated,
    AccountClosed,
    BalanceSynced,

    // Transaction events
    TransactionIngested,
    TransactionReconciled,
    TransactionSentToReview,
    OutflowApplied,

    // VOP events
    VopHeld,
    VopApproved,
    VopRejected,

    // Request events
    TopUpCreated,
    TopUpCompleted,
    TopUpExpired,
    TopUpCancelled,
    OrderRegistered,
    OrderPaid,

    // Integrity events
    DiscrepancyDetected,
    DiscrepancyResolved,

    // Admin events
    JobTriggered,
}

/// An audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User or job that triggered the event.
    pub actor: Option<String>,
    /// Resource affected (transaction id, account id, ...).
    pub resource_id: Option<String>,
    /// Resource type (transaction, account, ...).
    pub resource_type: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl Record for AuditEvent {
    const TABLE: RecordTable = AUDIT_EVENTS;

    fn key(&self) -> &str {
        &self.event_id
    }
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            actor: None,
            resource_id: None,
            resource_type: None,
            details: None,
        }
    }

    /// Set who triggered the event.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the resource.
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the event time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Append this event inside an open write transaction.
    pub fn record(&self, txn: &impl LedgerWrite) -> LedgerResult<()> {
        txn.store(self)
    }
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    db: &'a LedgerDb,
}

impl<'a> AuditRepository<'a> {
    /// Create a new audit repository.
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    /// Log a standalone event in its own write transaction.
    pub fn log(&self, event: &AuditEvent) -> LedgerResult<()> {
        self.db.write(|txn| event.record(txn))
    }

    /// Events touching a resource, oldest first.
    pub fn search_by_resource(&self, resource_id: &str) -> LedgerResult<Vec<AuditEvent>> {
        let mut events = self.read_all()?;
        events.retain(|e| e.resource_id.as_deref() == Some(resource_id));
        Ok(events)
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> LedgerResult<Vec<AuditEvent>> {
        let events = self.read_all()?;
        let skip = events.len().saturating_sub(limit);
        Ok(events.into_iter().skip(skip).collect())
    }

    fn read_all(&self) -> LedgerResult<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self.db.read(|txn| txn.load_all())?;
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Banking partner integrations.
//!
//! The reconciliation engine talks to the partner only through
//! [`BankingPartner`]. Two implementations exist:
//!
//! - [`partner_http::HttpPartnerClient`]: REST client with OAuth client
//!   credentials and a bounded request timeout
//! - [`sandbox::SandboxPartner`]: in-memory partner for development and tests

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{PartnerMode, PartnerSettings};
use crate::storage::{Direction, VopStatus};

pub mod partner_http;
pub mod sandbox;

#[derive(Debug, thiserror::Error)]
pub enum PartnerError {
    #[error("banking partner configuration missing: {0}")]
    MissingConfig(String),

    #[error("banking partner call timed out: {0}")]
    Timeout(String),

    #[error("banking partner auth failed: {0}")]
    Auth(String),

    #[error("banking partner request failed: {0}")]
    Request(String),

    #[error("banking partner response was invalid: {0}")]
    InvalidResponse(String),

    #[error("banking partner unavailable: {0}")]
    Unavailable(String),
}

impl PartnerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PartnerError::Timeout(_))
    }
}

/// Account status as reported by the partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerAccountStatus {
    Pending,
    Open,
    Closed,
}

/// Account snapshot returned by the partner.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerAccount {
    pub provider_account_id: String,
    pub iban: String,
    pub currency: String,
    pub status: PartnerAccountStatus,
    /// Booked balance in minor units.
    pub balance_minor: i64,
}

/// A booked transaction as reported by the partner (webhook or query API).
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerTransaction {
    /// Immutable partner transaction id.
    pub external_transaction_id: String,
    /// Partner account the transaction was booked on.
    pub provider_account_id: String,
    /// Positive amount in minor units.
    pub amount_minor: i64,
    pub currency: String,
    pub direction: Direction,
    pub reference: Option<String>,
    pub correlation_id: Option<String>,
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<String>,
    pub vop_status: Option<VopStatus>,
    pub booked_at: DateTime<Utc>,
}

/// Narrow interface onto the banking partner.
///
/// Every call is blocking I/O with a bounded timeout; a timeout surfaces as
/// [`PartnerError::Timeout`].
#[async_trait]
pub trait BankingPartner: Send + Sync {
    /// Provider name stamped on accounts.
    fn name(&self) -> &str;

    /// Ask the partner to open a Virtual IBAN for a user.
    async fn open_account(
        &self,
        user_id: &str,
        currency: &str,
    ) -> Result<PartnerAccount, PartnerError>;

    /// Current state and balance of one account.
    async fn get_account(&self, provider_account_id: &str)
        -> Result<PartnerAccount, PartnerError>;

    /// Transactions booked on an account within `[since, until]`.
    async fn list_transactions(
        &self,
        provider_account_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PartnerTransaction>, PartnerError>;

    /// Sum of all Virtual IBAN balances the partner holds in a currency.
    async fn get_aggregate_balance(&self, currency: &str) -> Result<i64, PartnerError>;
}

/// Build the partner selected by configuration.
pub fn build_partner(settings: &PartnerSettings) -> Result<Arc<dyn BankingPartner>, PartnerError> {
    match settings.mode {
        PartnerMode::Sandbox => Ok(Arc::new(sandbox::SandboxPartner::new(&settings.name))),
        PartnerMode::Http => Ok(Arc::new(partner_http::HttpPartnerClient::from_settings(
            settings,
        )?)),
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy of the reconciliation engine.
//!
//! Concurrency conflicts (`AlreadyProcessed`, `AlreadyReviewed`,
//! `InvalidState`) are expected outcomes of racing writers, not faults.

use crate::models::MoneyError;
use crate::providers::PartnerError;
use crate::storage::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum VibanError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid currency: {0}")]
    InvalidCurrency(String),

    #[error("invalid payment reference: {0}")]
    InvalidReference(String),

    #[error("account {account_id} is not eligible (status {status})")]
    AccountNotEligible { account_id: String, status: String },

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{resource} {id} was already processed")]
    AlreadyProcessed { resource: &'static str, id: String },

    #[error("transaction {0} was already reviewed")]
    AlreadyReviewed(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("mismatch: {0}")]
    Mismatch(String),

    #[error("no account for partner reference {0}")]
    UnknownAccount(String),

    #[error("secure random generator unavailable")]
    RandomUnavailable,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Partner(#[from] PartnerError),
}

impl VibanError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn already_processed(resource: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyProcessed {
            resource,
            id: id.into(),
        }
    }

    /// Whether this error is a lost race or stale request rather than a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyProcessed { .. } | Self::AlreadyReviewed(_) | Self::InvalidState(_)
        )
    }
}

impl From<MoneyError> for VibanError {
    fn from(error: MoneyError) -> Self {
        match error {
            MoneyError::InvalidCurrency => Self::InvalidCurrency(error.to_string()),
            MoneyError::InvalidAmount | MoneyError::TooManyDecimals | MoneyError::Overflow => {
                Self::InvalidAmount(error.to_string())
            }
        }
    }
}

pub type VibanResult<T> = Result<T, VibanError>;

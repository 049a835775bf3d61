// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory banking partner.
//!
//! Accounts open in `Pending` and report `Open` on the first `get_account`
//! call. Booked credits and debits move the partner-side balance, so the
//! aggregate equals the sum of balances unless overridden. Failures can be
//! injected to exercise timeout handling.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{BankingPartner, PartnerAccount, PartnerAccountStatus, PartnerError, PartnerTransaction};
use crate::storage::Direction;

/// Failure to return from the next partner calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Timeout,
    Unavailable,
}

#[derive(Default)]
struct SandboxState {
    accounts: HashMap<String, PartnerAccount>,
    transactions: Vec<PartnerTransaction>,
    aggregate_overrides: HashMap<String, i64>,
    failure: Option<InjectedFailure>,
    next_account: u64,
}

pub struct SandboxPartner {
    name: String,
    state: Mutex<SandboxState>,
}

impl SandboxPartner {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SandboxState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(&self) -> Result<(), PartnerError> {
        match self.state().failure {
            Some(InjectedFailure::Timeout) => Err(PartnerError::Timeout(
                "sandbox injected timeout".to_string(),
            )),
            Some(InjectedFailure::Unavailable) => Err(PartnerError::Unavailable(
                "sandbox injected outage".to_string(),
            )),
            None => Ok(()),
        }
    }

    /// Make every subsequent call fail until cleared with `None`.
    pub fn inject_failure(&self, failure: Option<InjectedFailure>) {
        self.state().failure = failure;
    }

    /// Register an already open account with a starting balance.
    pub fn add_open_account(&self, provider_account_id: &str, currency: &str, balance_minor: i64) {
        let mut state = self.state();
        state.accounts.insert(
            provider_account_id.to_string(),
            PartnerAccount {
                provider_account_id: provider_account_id.to_string(),
                iban: sandbox_iban(provider_account_id),
                currency: currency.to_string(),
                status: PartnerAccountStatus::Open,
                balance_minor,
            },
        );
    }

    /// Overwrite the partner-side balance of an account.
    pub fn set_balance(&self, provider_account_id: &str, balance_minor: i64) {
        if let Some(account) = self.state().accounts.get_mut(provider_account_id) {
            account.balance_minor = balance_minor;
        }
    }

    /// Force the aggregate reported for a currency.
    pub fn set_aggregate(&self, currency: &str, total_minor: i64) {
        self.state()
            .aggregate_overrides
            .insert(currency.to_string(), total_minor);
    }

    /// Book a transaction and apply it to the partner-side balance.
    pub fn book(&self, transaction: PartnerTransaction) {
        let mut state = self.state();
        if let Some(account) = state.accounts.get_mut(&transaction.provider_account_id) {
            account.balance_minor += match transaction.direction {
                Direction::Credit => transaction.amount_minor,
                Direction::Debit => -transaction.amount_minor,
            };
        }
        state.transactions.push(transaction);
    }
}

fn sandbox_iban(provider_account_id: &str) -> String {
    let digits: String = provider_account_id
        .bytes()
        .map(|b| char::from(b'0' + b % 10))
        .chain(std::iter::repeat('0'))
        .take(18)
        .collect();
    format!("DE00{digits}")
}

#[async_trait]
impl BankingPartner for SandboxPartner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_account(
        &self,
        user_id: &str,
        currency: &str,
    ) -> Result<PartnerAccount, PartnerError> {
        self.check_failure()?;
        let mut state = self.state();
        state.next_account += 1;
        let provider_account_id = format!("sbx-{}-{}", state.next_account, user_id);
        let account = PartnerAccount {
            iban: sandbox_iban(&provider_account_id),
            provider_account_id: provider_account_id.clone(),
            currency: currency.to_string(),
            status: PartnerAccountStatus::Pending,
            balance_minor: 0,
        };
        state.accounts.insert(provider_account_id, account.clone());
        Ok(account)
    }

    async fn get_account(
        &self,
        provider_account_id: &str,
    ) -> Result<PartnerAccount, PartnerError> {
        self.check_failure()?;
        let mut state = self.state();
        let account = state
            .accounts
            .get_mut(provider_account_id)
            .ok_or_else(|| {
                PartnerError::Request(format!("unknown account {provider_account_id}"))
            })?;
        if account.status == PartnerAccountStatus::Pending {
            account.status = PartnerAccountStatus::Open;
        }
        Ok(account.clone())
    }

    async fn list_transactions(
        &self,
        provider_account_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PartnerTransaction>, PartnerError> {
        self.check_failure()?;
        Ok(self
            .state()
            .transactions
            .iter()
            .filter(|tx| {
                tx.provider_account_id == provider_account_id
                    && tx.booked_at >= since
                    && tx.booked_at <= until
            })
            .cloned()
            .collect())
    }

    async fn get_aggregate_balance(&self, currency: &str) -> Result<i64, PartnerError> {
        self.check_failure()?;
        let state = self.state();
        if let Some(total) = state.aggregate_overrides.get(currency) {
            return Ok(*total);
        }
        Ok(state
            .accounts
            .values()
            .filter(|a| a.currency == currency && a.status == PartnerAccountStatus::Open)
            .map(|a| a.balance_minor)
            .sum())
    }
}

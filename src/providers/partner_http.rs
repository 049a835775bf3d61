// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! REST client for the banking partner's Virtual IBAN API.
//!
//! Authenticates with OAuth client credentials and sends JSON requests with a
//! bounded timeout. Amounts travel as two-decimal strings on the wire.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{BankingPartner, PartnerAccount, PartnerAccountStatus, PartnerError, PartnerTransaction};
use crate::config::PartnerSettings;
use crate::models::{normalize_currency, parse_signed_amount_to_minor};
use crate::storage::{Direction, VopStatus};

const ACCOUNTS_SCOPE: &str = "accounts";

#[derive(Debug, Clone)]
pub struct HttpPartnerClient {
    name: String,
    api_base_url: Url,
    auth_url: Url,
    client_id: String,
    client_secret: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct AccountPayload {
    account_id: String,
    iban: String,
    currency: String,
    status: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct TransactionListPayload {
    transactions: Vec<TransactionPayload>,
}

/// A transaction as the partner puts it on the wire, in query responses
/// and webhook deliveries alike.
#[derive(Debug, Deserialize)]
pub struct TransactionPayload {
    pub transaction_id: String,
    pub account_id: String,
    pub amount: String,
    pub currency: String,
    pub direction: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub counterparty_name: Option<String>,
    #[serde(default)]
    pub counterparty_iban: Option<String>,
    #[serde(default)]
    pub vop_status: Option<String>,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AggregateBalancePayload {
    currency: String,
    total: String,
}

impl HttpPartnerClient {
    pub fn from_settings(settings: &PartnerSettings) -> Result<Self, PartnerError> {
        let api_base_url = settings
            .api_base_url
            .clone()
            .ok_or_else(|| PartnerError::MissingConfig("PARTNER_API_BASE_URL".to_string()))?;
        let auth_url = settings
            .auth_url
            .clone()
            .ok_or_else(|| PartnerError::MissingConfig("PARTNER_AUTH_URL".to_string()))?;
        let client_id = settings
            .client_id
            .clone()
            .ok_or_else(|| PartnerError::MissingConfig("PARTNER_CLIENT_ID".to_string()))?;
        let client_secret = settings
            .client_secret
            .clone()
            .ok_or_else(|| PartnerError::MissingConfig("PARTNER_CLIENT_SECRET".to_string()))?;

        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| PartnerError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: settings.name.clone(),
            api_base_url,
            auth_url,
            client_id,
            client_secret,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.api_base_url.as_str().trim_end_matches('/'),
            path
        )
    }

    async fn access_token(&self) -> Result<String, PartnerError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "client_credentials");
        form.insert("client_id", self.client_id.as_str());
        form.insert("client_secret", self.client_secret.as_str());
        form.insert("scope", ACCOUNTS_SCOPE);

        let response = self
            .http
            .post(self.auth_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error("token request", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PartnerError::Auth(format!(
                "token request returned {status}: {body}"
            )));
        }

        let token_response: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| PartnerError::Auth(format!("invalid token response: {e}")))?;

        if token_response.access_token.trim().is_empty() {
            return Err(PartnerError::Auth(
                "token response did not include access_token".to_string(),
            ));
        }

        Ok(token_response.access_token)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        label: &str,
        request: RequestBuilder,
    ) -> Result<T, PartnerError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error(label, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{label} returned {status}: {body}");
            return Err(if status.is_server_error() {
                PartnerError::Unavailable(message)
            } else {
                PartnerError::Request(message)
            });
        }

        debug!(call = label, "Partner call succeeded");
        response
            .json()
            .await
            .map_err(|e| PartnerError::InvalidResponse(format!("{label} invalid JSON: {e}")))
    }
}

#[async_trait]
impl BankingPartner for HttpPartnerClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_account(
        &self,
        user_id: &str,
        currency: &str,
    ) -> Result<PartnerAccount, PartnerError> {
        let request = self
            .http
            .post(self.endpoint("/v1/virtual-ibans"))
            .json(&json!({ "external_user_id": user_id, "currency": currency }));
        let payload: AccountPayload = self.send_json("POST /v1/virtual-ibans", request).await?;
        payload.into_account()
    }

    async fn get_account(
        &self,
        provider_account_id: &str,
    ) -> Result<PartnerAccount, PartnerError> {
        let path = format!("/v1/virtual-ibans/{provider_account_id}");
        let request = self.http.get(self.endpoint(&path));
        let payload: AccountPayload = self.send_json(&format!("GET {path}"), request).await?;
        payload.into_account()
    }

    async fn list_transactions(
        &self,
        provider_account_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PartnerTransaction>, PartnerError> {
        let path = format!("/v1/virtual-ibans/{provider_account_id}/transactions");
        let request = self.http.get(self.endpoint(&path)).query(&[
            ("from", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("to", until.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ]);
        let payload: TransactionListPayload =
            self.send_json(&format!("GET {path}"), request).await?;
        payload
            .transactions
            .into_iter()
            .map(TransactionPayload::into_transaction)
            .collect()
    }

    async fn get_aggregate_balance(&self, currency: &str) -> Result<i64, PartnerError> {
        let request = self
            .http
            .get(self.endpoint("/v1/balances/aggregate"))
            .query(&[("currency", currency)]);
        let payload: AggregateBalancePayload = self
            .send_json("GET /v1/balances/aggregate", request)
            .await?;
        if !payload.currency.eq_ignore_ascii_case(currency) {
            return Err(PartnerError::InvalidResponse(format!(
                "aggregate requested for {currency}, partner answered {}",
                payload.currency
            )));
        }
        parse_wire_amount(&payload.total)
    }
}

impl AccountPayload {
    fn into_account(self) -> Result<PartnerAccount, PartnerError> {
        Ok(PartnerAccount {
            status: map_account_status(&self.status)?,
            balance_minor: parse_wire_amount(&self.balance)?,
            currency: parse_wire_currency(&self.currency)?,
            provider_account_id: self.account_id,
            iban: self.iban,
        })
    }
}

impl TransactionPayload {
    pub fn into_transaction(self) -> Result<PartnerTransaction, PartnerError> {
        let amount_minor = parse_wire_amount(&self.amount)?;
        if amount_minor <= 0 {
            return Err(PartnerError::InvalidResponse(format!(
                "transaction {} has non-positive amount {}",
                self.transaction_id, self.amount
            )));
        }
        Ok(PartnerTransaction {
            direction: map_direction(&self.direction)?,
            vop_status: self.vop_status.as_deref().map(map_vop_status).transpose()?,
            currency: parse_wire_currency(&self.currency)?,
            external_transaction_id: self.transaction_id,
            provider_account_id: self.account_id,
            amount_minor,
            reference: self.reference,
            correlation_id: self.correlation_id,
            counterparty_name: self.counterparty_name,
            counterparty_iban: self.counterparty_iban,
            booked_at: self.booked_at,
        })
    }
}

fn transport_error(label: &str, error: reqwest::Error) -> PartnerError {
    if error.is_timeout() {
        PartnerError::Timeout(format!("{label}: {error}"))
    } else {
        PartnerError::Unavailable(format!("{label}: {error}"))
    }
}

fn parse_wire_amount(raw: &str) -> Result<i64, PartnerError> {
    parse_signed_amount_to_minor(raw)
        .map_err(|e| PartnerError::InvalidResponse(format!("amount {raw:?}: {e}")))
}

fn parse_wire_currency(raw: &str) -> Result<String, PartnerError> {
    normalize_currency(raw)
        .map_err(|e| PartnerError::InvalidResponse(format!("currency {raw:?}: {e}")))
}

pub fn map_account_status(raw: &str) -> Result<PartnerAccountStatus, PartnerError> {
    match raw.to_ascii_lowercase().as_str() {
        "pending" | "requested" => Ok(PartnerAccountStatus::Pending),
        "open" | "active" => Ok(PartnerAccountStatus::Open),
        "closed" => Ok(PartnerAccountStatus::Closed),
        other => Err(PartnerError::InvalidResponse(format!(
            "unknown account status {other:?}"
        ))),
    }
}

pub fn map_direction(raw: &str) -> Result<Direction, PartnerError> {
    match raw.to_ascii_lowercase().as_str() {
        "credit" | "in" | "incoming" => Ok(Direction::Credit),
        "debit" | "out" | "outgoing" => Ok(Direction::Debit),
        other => Err(PartnerError::InvalidResponse(format!(
            "unknown direction {other:?}"
        ))),
    }
}

pub fn map_vop_status(raw: &str) -> Result<VopStatus, PartnerError> {
    match raw.to_ascii_uppercase().as_str() {
        "MATCH" => Ok(VopStatus::Match),
        "CLOSE_MATCH" => Ok(VopStatus::CloseMatch),
        "NO_MATCH" => Ok(VopStatus::NoMatch),
        "IMPOSSIBLE_MATCH" => Ok(VopStatus::ImpossibleMatch),
        other => Err(PartnerError::InvalidResponse(format!(
            "unknown VOP status {other:?}"
        ))),
    }
}

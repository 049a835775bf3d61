// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding `ledger.redb` | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; serve HTTPS when both are set | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `AUTH_JWT_SECRET` | HS256 secret for bearer tokens | unset (dev mode) |
//! | `AUTH_JWT_ISSUER` | Required `iss` claim when verifying tokens | unset |
//! | `PARTNER_MODE` | `sandbox` or `http` | `sandbox` |
//! | `PARTNER_NAME` | Provider name stamped on accounts | `partner` |
//! | `PARTNER_API_BASE_URL` | Partner REST base URL | required for `http` |
//! | `PARTNER_AUTH_URL` | OAuth token endpoint | required for `http` |
//! | `PARTNER_CLIENT_ID` / `PARTNER_CLIENT_SECRET` | OAuth client credentials | required for `http` |
//! | `PARTNER_TIMEOUT_SECS` | Per-request timeout | `15` |
//! | `PARTNER_WEBHOOK_SECRET` | HMAC secret for webhook signatures | unset (unverified) |
//! | `TOPUP_TTL_HOURS` | Top-up request lifetime | `24` |
//! | `MATCH_LOOKBACK_HOURS` | Amount/owner matching window | `48` |
//! | `AMOUNT_TOLERANCE_MINOR` | Accepted amount deviation when matching | `0` |
//! | `BALANCE_TOLERANCE_MINOR` | Accepted per-currency balance deviation | `0` |
//! | `SYNC_WINDOW_MINUTES` | Trailing window fetched by the payment poller | `30` |
//! | `SYNC_INTERVAL_SECS` | Payment poller period | `300` |
//! | `RECONCILE_INTERVAL_SECS` | Reconciliation sweep period | `120` |
//! | `VALIDATE_INTERVAL_SECS` | Balance validation period | `3600` |
//! | `EXPIRY_INTERVAL_SECS` | Top-up expiry sweep period | `300` |
//! | `JOBS_ENABLED` | Run the background scheduler | `true` |

use std::{path::PathBuf, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use url::Url;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
pub const DEFAULT_PARTNER_NAME: &str = "partner";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

/// Matching and validation knobs used by the reconciliation engine.
#[derive(Debug, Clone)]
pub struct ReconciliationSettings {
    pub topup_ttl: Duration,
    pub match_lookback: Duration,
    pub amount_tolerance_minor: i64,
    pub balance_tolerance_minor: i64,
    pub sync_window: Duration,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            topup_ttl: Duration::hours(24),
            match_lookback: Duration::hours(48),
            amount_tolerance_minor: 0,
            balance_tolerance_minor: 0,
            sync_window: Duration::minutes(30),
        }
    }
}

/// Periods of the background loops.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub enabled: bool,
    pub sync_interval: StdDuration,
    pub reconcile_interval: StdDuration,
    pub validate_interval: StdDuration,
    pub expiry_interval: StdDuration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval: StdDuration::from_secs(300),
            reconcile_interval: StdDuration::from_secs(120),
            validate_interval: StdDuration::from_secs(3600),
            expiry_interval: StdDuration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerMode {
    /// In-process partner with no external calls.
    Sandbox,
    /// Real partner over HTTPS.
    Http,
}

#[derive(Debug, Clone)]
pub struct PartnerSettings {
    pub mode: PartnerMode,
    pub name: String,
    pub api_base_url: Option<Url>,
    pub auth_url: Option<Url>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout: StdDuration,
    pub webhook_secret: Option<String>,
}

impl Default for PartnerSettings {
    fn default() -> Self {
        Self {
            mode: PartnerMode::Sandbox,
            name: DEFAULT_PARTNER_NAME.to_string(),
            api_base_url: None,
            auth_url: None,
            client_id: None,
            client_secret: None,
            timeout: StdDuration::from_secs(15),
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub log_format: LogFormat,
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub partner: PartnerSettings,
    pub reconciliation: ReconciliationSettings,
    pub jobs: JobSettings,
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let mode = match env.optional("PARTNER_MODE").as_deref() {
            None | Some("sandbox") => PartnerMode::Sandbox,
            Some("http") => PartnerMode::Http,
            Some(other) => return Err(invalid("PARTNER_MODE", other)),
        };
        let log_format = match env.optional("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            None | Some("pretty") => LogFormat::Pretty,
            Some(other) => return Err(invalid("LOG_FORMAT", other)),
        };

        let partner = PartnerSettings {
            mode,
            name: env
                .optional("PARTNER_NAME")
                .unwrap_or_else(|| DEFAULT_PARTNER_NAME.to_string()),
            api_base_url: env.parsed("PARTNER_API_BASE_URL")?,
            auth_url: env.parsed("PARTNER_AUTH_URL")?,
            client_id: env.optional("PARTNER_CLIENT_ID"),
            client_secret: env.optional("PARTNER_CLIENT_SECRET"),
            timeout: StdDuration::from_secs(env.parsed_or("PARTNER_TIMEOUT_SECS", 15)?),
            webhook_secret: env.optional("PARTNER_WEBHOOK_SECRET"),
        };

        let reconciliation = ReconciliationSettings {
            topup_ttl: Duration::hours(env.parsed_or("TOPUP_TTL_HOURS", 24)?),
            match_lookback: Duration::hours(env.parsed_or("MATCH_LOOKBACK_HOURS", 48)?),
            amount_tolerance_minor: non_negative(
                "AMOUNT_TOLERANCE_MINOR",
                env.parsed_or("AMOUNT_TOLERANCE_MINOR", 0)?,
            )?,
            balance_tolerance_minor: non_negative(
                "BALANCE_TOLERANCE_MINOR",
                env.parsed_or("BALANCE_TOLERANCE_MINOR", 0)?,
            )?,
            sync_window: Duration::minutes(env.parsed_or("SYNC_WINDOW_MINUTES", 30)?),
        };

        let jobs = JobSettings {
            enabled: env.parsed_or("JOBS_ENABLED", true)?,
            sync_interval: StdDuration::from_secs(env.parsed_or("SYNC_INTERVAL_SECS", 300)?),
            reconcile_interval: StdDuration::from_secs(
                env.parsed_or("RECONCILE_INTERVAL_SECS", 120)?,
            ),
            validate_interval: StdDuration::from_secs(
                env.parsed_or("VALIDATE_INTERVAL_SECS", 3600)?,
            ),
            expiry_interval: StdDuration::from_secs(env.parsed_or("EXPIRY_INTERVAL_SECS", 300)?),
        };

        Ok(Self {
            data_dir: env
                .optional(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            host: env
                .optional("HOST")
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: env.parsed_or("PORT", DEFAULT_PORT)?,
            tls_cert_path: env.optional("TLS_CERT_PATH").map(PathBuf::from),
            tls_key_path: env.optional("TLS_KEY_PATH").map(PathBuf::from),
            log_format,
            jwt_secret: env.optional("AUTH_JWT_SECRET"),
            jwt_issuer: env.optional("AUTH_JWT_ISSUER"),
            partner,
            reconciliation,
            jobs,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Trimmed value, `None` when unset or blank.
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        self.optional(name)
            .map(|raw| raw.parse::<T>().map_err(|_| invalid(name, &raw)))
            .transpose()
    }

    fn parsed_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parsed(name)?.unwrap_or(default))
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn non_negative(name: &str, value: i64) -> Result<i64, ConfigError> {
    if value < 0 {
        Err(invalid(name, &value.to_string()))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.partner.mode, PartnerMode::Sandbox);
        assert_eq!(config.reconciliation.topup_ttl, Duration::hours(24));
        assert_eq!(config.reconciliation.match_lookback, Duration::hours(48));
        assert_eq!(config.reconciliation.amount_tolerance_minor, 0);
        assert!(config.jobs.enabled);
        assert!(config.jwt_secret.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("PARTNER_MODE", "http"),
            ("PARTNER_API_BASE_URL", "https://api.partner.test"),
            ("AMOUNT_TOLERANCE_MINOR", "5"),
            ("JOBS_ENABLED", "false"),
            ("LOG_FORMAT", "json"),
            ("TOPUP_TTL_HOURS", " 2 "),
        ])
        .unwrap();
        assert_eq!(config.partner.mode, PartnerMode::Http);
        assert_eq!(
            config.partner.api_base_url.map(|u| u.host_str().map(str::to_string)),
            Some(Some("api.partner.test".to_string()))
        );
        assert_eq!(config.reconciliation.amount_tolerance_minor, 5);
        assert_eq!(config.reconciliation.topup_ttl, Duration::hours(2));
        assert!(!config.jobs.enabled);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(load(&[("PORT", "eighty")]).is_err());
        assert!(load(&[("PARTNER_MODE", "carrier-pigeon")]).is_err());
        assert!(load(&[("AMOUNT_TOLERANCE_MINOR", "-1")]).is_err());
        assert!(load(&[("PARTNER_API_BASE_URL", "not a url")]).is_err());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::config::ReconciliationSettings;
use crate::providers::BankingPartner;
use crate::storage::LedgerDb;

/// Bearer token verification settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// HS256 secret; `None` selects development mode.
    pub jwt_secret: Option<String>,
    /// Required `iss` claim, if any.
    pub issuer: Option<String>,
}

/// Shared state handed to every handler and background job.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerDb>,
    pub partner: Arc<dyn BankingPartner>,
    pub reconciliation: Arc<ReconciliationSettings>,
    pub auth_config: AuthConfig,
    /// HMAC secret for partner webhooks; `None` accepts unsigned deliveries.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        ledger: Arc<LedgerDb>,
        partner: Arc<dyn BankingPartner>,
        reconciliation: ReconciliationSettings,
    ) -> Self {
        Self {
            ledger,
            partner,
            reconciliation: Arc::new(reconciliation),
            auth_config: AuthConfig::default(),
            webhook_secret: None,
        }
    }

    pub fn with_auth_config(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
        self
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.map(Arc::from);
        self
    }
}

/// State over a throw-away ledger and a fresh sandbox partner.
#[cfg(test)]
pub(crate) fn test_state() -> (AppState, tempfile::TempDir) {
    let partner = Arc::new(crate::providers::sandbox::SandboxPartner::new("partner"));
    test_state_with(partner)
}

#[cfg(test)]
pub(crate) fn test_state_with(
    partner: Arc<crate::providers::sandbox::SandboxPartner>,
) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = LedgerDb::open(&dir.path().join(crate::storage::LEDGER_FILE)).unwrap();
    let state = AppState::new(
        Arc::new(ledger),
        partner,
        ReconciliationSettings::default(),
    );
    (state, dir)
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Jobs
//!
//! Four periodic tasks drive the engine without user traffic:
//!
//! | Job | Default cadence | Operation |
//! |---|---|---|
//! | `payment-sync` | 5 min | re-fetch recent partner transactions |
//! | `reconciliation` | 2 min | sweep PENDING transactions |
//! | `balance-validation` | 1 h | compare totals with the partner aggregate |
//! | `topup-expiry` | 5 min | expire overdue top-up requests |
//!
//! Each job runs in its own task, so a slow partner call in one never delays
//! another. Every job is idempotent and may also be triggered by an admin
//! while its loop is running.
//!
//! ## Shutdown
//!
//! Loops stop when the shared `CancellationToken` is cancelled, either while
//! sleeping or before starting the next run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::JobSettings;
use crate::state::AppState;
use crate::viban::{
    BalanceValidator, ExpirySummary, PaymentSync, Reconciler, SweepSummary, SyncReport,
    TopUpManager, ValidationReport, VibanResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Reconciliation,
    BalanceValidation,
    PaymentSync,
    TopUpExpiry,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::PaymentSync,
        JobKind::Reconciliation,
        JobKind::BalanceValidation,
        JobKind::TopUpExpiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Reconciliation => "reconciliation",
            JobKind::BalanceValidation => "balance-validation",
            JobKind::PaymentSync => "payment-sync",
            JobKind::TopUpExpiry => "topup-expiry",
        }
    }

    fn interval(&self, settings: &JobSettings) -> Duration {
        match self {
            JobKind::Reconciliation => settings.reconcile_interval,
            JobKind::BalanceValidation => settings.validate_interval,
            JobKind::PaymentSync => settings.sync_interval,
            JobKind::TopUpExpiry => settings.expiry_interval,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job {0}")]
pub struct UnknownJob(pub String);

impl FromStr for JobKind {
    type Err = UnknownJob;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownJob(s.to_string()))
    }
}

/// What a job run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "job", content = "result", rename_all = "kebab-case")]
pub enum JobReport {
    Reconciliation(SweepSummary),
    BalanceValidation(ValidationReport),
    PaymentSync(SyncReport),
    TopupExpiry(ExpirySummary),
}

/// Run one job to completion.
pub async fn run_job(state: &AppState, kind: JobKind) -> VibanResult<JobReport> {
    let now = Utc::now();
    let db = state.ledger.as_ref();
    let partner = state.partner.as_ref();
    let settings = state.reconciliation.as_ref();

    let report = match kind {
        JobKind::Reconciliation => {
            JobReport::Reconciliation(Reconciler::new(db, settings).run_sweep(now)?)
        }
        JobKind::BalanceValidation => JobReport::BalanceValidation(
            BalanceValidator::new(db, partner, settings).run(now).await?,
        ),
        JobKind::PaymentSync => {
            JobReport::PaymentSync(PaymentSync::new(db, partner, settings).run(now).await?)
        }
        JobKind::TopUpExpiry => {
            JobReport::TopupExpiry(TopUpManager::new(db, settings).expire_old_requests(now)?)
        }
    };
    Ok(report)
}

/// Spawn one loop per job. Returns immediately with the task handles.
pub fn spawn_scheduler(
    state: AppState,
    settings: &JobSettings,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    JobKind::ALL
        .into_iter()
        .map(|kind| {
            let interval = kind.interval(settings);
            tokio::spawn(run_loop(state.clone(), kind, interval, shutdown.clone()))
        })
        .collect()
}

async fn run_loop(state: AppState, kind: JobKind, interval: Duration, shutdown: CancellationToken) {
    info!(job = %kind, interval_secs = interval.as_secs(), "Job loop starting");

    loop {
        if shutdown.is_cancelled() {
            info!(job = %kind, "Job loop shutting down");
            return;
        }

        if let Err(e) = run_job(&state, kind).await {
            warn!(job = %kind, error = %e, "Job run failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown.cancelled() => {
                info!(job = %kind, "Job loop shutting down");
                return;
            }
        }
    }
}

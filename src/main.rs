// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use viban_reconciliation::{
    api::router,
    config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER},
    jobs::spawn_scheduler,
    providers::build_partner,
    state::{AppState, AuthConfig},
    storage::{LedgerDb, LEDGER_FILE},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("Invalid configuration");
    init_tracing(config.log_format);

    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");
    let ledger = LedgerDb::open(&config.data_dir.join(LEDGER_FILE)).expect("Failed to open ledger");
    info!(data_dir = %config.data_dir.display(), "Ledger opened");

    let partner = build_partner(&config.partner).expect("Failed to configure banking partner");
    info!(partner = partner.name(), mode = ?config.partner.mode, "Banking partner configured");

    if config.jwt_secret.is_none() {
        warn!("AUTH_JWT_SECRET not set; bearer tokens are NOT signature-checked (development mode)");
    }
    if config.partner.webhook_secret.is_none() {
        warn!("PARTNER_WEBHOOK_SECRET not set; webhook deliveries are accepted unsigned");
    }

    let state = AppState::new(Arc::new(ledger), partner, config.reconciliation.clone())
        .with_auth_config(AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
            issuer: config.jwt_issuer.clone(),
        })
        .with_webhook_secret(config.partner.webhook_secret.clone());

    let shutdown = CancellationToken::new();
    let jobs = if config.jobs.enabled {
        spawn_scheduler(state.clone(), &config.jobs, shutdown.clone())
    } else {
        info!("Background jobs disabled");
        Vec::new()
    };

    let app = router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone(), shutdown.clone()));

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            rustls::crypto::ring::default_provider()
                .install_default()
                .expect("Failed to install rustls crypto provider");
            let tls = RustlsConfig::from_pem_file(cert, key)
                .await
                .expect("Failed to load TLS certificate");
            info!(%addr, "Listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTPS server failed");
        }
        _ => {
            info!(%addr, "Listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTP server failed");
        }
    }

    shutdown.cancel();
    for job in jobs {
        if let Err(e) = job.await {
            error!(error = %e, "Job loop ended abnormally");
        }
    }
    info!("Shutdown complete");
}

async fn shutdown_signal(handle: Handle<SocketAddr>, shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

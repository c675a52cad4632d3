// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc};

use custody_core::{
    api::router,
    blockchain::{CustodialSigner, NetworkConfig, RpcChainPeer},
    config::{AppConfig, CustodialKeySource, DEFAULT_LOG_FILTER, LOG_FORMAT_ENV},
    ingestor::RetryWorker,
    ledger::LedgerClient,
    shutdown::shutdown_signal,
    state::{AppState, ServiceSettings},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = AppConfig::from_env().expect("Invalid configuration");

    let signer = match &config.custodial_key {
        CustodialKeySource::Hex(key) => CustodialSigner::from_hex(key),
        CustodialKeySource::PemFile(path) => {
            let pem = std::fs::read(path).expect("Failed to read custodial key file");
            CustodialSigner::from_pem(&pem)
        }
    }
    .expect("Failed to load custodial key");

    let network = NetworkConfig::new(config.chain_id, config.chain_rpc_url.clone())
        .with_explorer(config.chain_explorer_url.clone());
    let chain = RpcChainPeer::new(network.clone()).expect("Invalid chain RPC URL");
    let ledger = LedgerClient::new(&config.ledger_api_url, config.ledger_api_key.clone())
        .expect("Invalid ledger API URL");

    if config.webhook_hmac_secret.is_none() {
        tracing::warn!(
            "WEBHOOK_HMAC_SECRET is not set: webhook authenticity must be enforced by an upstream gateway"
        );
    }

    let custodial_address = signer.address();
    let state = AppState::new(
        Arc::new(ledger),
        Arc::new(chain),
        signer,
        network,
        ServiceSettings::from(&config),
    );

    let shutdown = CancellationToken::new();
    let retry_worker = tokio::spawn(
        RetryWorker::new(state.ingestor.clone(), config.ingest_retry_interval)
            .run(shutdown.clone()),
    );

    let hub = state.hub.clone();
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    tracing::info!(
        %addr,
        %custodial_address,
        chain_id = config.chain_id,
        "Custody core listening (docs at /docs)"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends every live stream so open WebSockets do not hold up shutdown.
            hub.close();
        })
        .await
        .expect("HTTP server failed");

    shutdown.cancel();
    if let Err(e) = retry_worker.await {
        tracing::error!(error = %e, "Webhook retry worker panicked");
    }
    tracing::info!("Server shutdown complete");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    match std::env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("json") => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

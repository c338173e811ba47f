// =============================================================================
// Candlestick Gateway — Main Entry Point
// =============================================================================
//
// Serves historical OHLCV candlesticks for US stocks over HTTP, sourced from a
// locally running brokerage gateway. Without the `tws` feature the service
// starts against the built-in demo gateway.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod candles;
mod gateway;
mod runtime_config;
mod session_pool;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::ServiceConfig;

const DEFAULT_CONFIG_PATH: &str = "service_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Candlestick Gateway — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("CANDLES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = ServiceConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(path = %config_path, error = %e, "Failed to load config, using defaults");
        ServiceConfig::default()
    });
    config.apply_env_overrides();
    config.normalise();

    info!(
        gateway = %config.gateway.kind,
        address = %config.gateway.address(),
        base_client_id = config.gateway.base_client_id,
        policy = %config.session.policy,
        pool_size = config.session.pool_size,
        "Gateway settings"
    );
    info!(origins = ?config.cors_origins, "Allowed browser origins");

    // ── 2. Gateway + shared state ────────────────────────────────────────
    let gateway = gateway::build(&config.gateway)?;
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, gateway));

    // Open the first session in the background so a missing gateway does
    // not keep the HTTP server from coming up.
    let warm_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = warm_state.pool().warm_up().await {
            warn!(error = %e, "Gateway not reachable at startup; will retry per request");
        }
    });

    // ── 3. API server ────────────────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    state.pool().close();
    info!("Candlestick Gateway shut down complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    warn!("Shutdown signal received — stopping gracefully");
}

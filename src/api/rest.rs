// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
//   GET /api/stocks/{symbol}/candlesticks[/]?timeframe=1 min&duration=1 D
//   GET /api/health
//
// CORS only admits the configured origins. Credentials are allowed, so
// methods and headers are mirrored from the preflight instead of using the
// `*` wildcard (browsers reject `*` together with credentials).
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderValue,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::runtime_config::is_valid_origin;
use crate::session_pool::PoolStats;
use crate::types::{BarRequest, Candlestick, DEFAULT_DURATION, DEFAULT_TIMEFRAME};

// =============================================================================
// Router construction
// =============================================================================

/// Build the API router with CORS, request tracing and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/stocks/:symbol/candlesticks", get(candlesticks))
        .route("/api/stocks/:symbol/candlesticks/", get(candlesticks))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS policy for the configured allow-list.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter(|o| is_valid_origin(o))
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "skipping CORS origin that is not a valid header value");
                None
            }
        })
        .collect();

    info!(origins = allowed.len(), "CORS allow-list configured");

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

// =============================================================================
// Candlesticks
// =============================================================================

fn default_timeframe() -> String {
    DEFAULT_TIMEFRAME.to_string()
}

fn default_duration() -> String {
    DEFAULT_DURATION.to_string()
}

#[derive(Debug, Deserialize)]
struct CandlestickParams {
    #[serde(default = "default_timeframe")]
    timeframe: String,
    #[serde(default = "default_duration")]
    duration: String,
}

async fn candlesticks(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<CandlestickParams>,
) -> Result<Json<Vec<Candlestick>>, ApiError> {
    let request_id = Uuid::new_v4();
    let req = BarRequest::new(symbol)
        .with_timeframe(params.timeframe)
        .with_duration(params.duration);

    match state.candles.fetch_candlesticks(&req).await {
        Ok(bars) => {
            state.record(true);
            info!(
                %request_id,
                symbol = %req.symbol,
                timeframe = %req.timeframe,
                duration = %req.duration,
                count = bars.len(),
                "candlesticks served"
            );
            Ok(Json(bars))
        }
        Err(e) => {
            state.record(false);
            Err(ApiError::from_candle_error(e, request_id))
        }
    }
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    gateway: &'static str,
    pool: PoolStats,
    served: u64,
    failed: u64,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.pool();
    Json(HealthResponse {
        status: "ok",
        gateway: pool.gateway_name(),
        pool: pool.stats(),
        served: state.served.load(Ordering::Relaxed),
        failed: state.failed.load(Ordering::Relaxed),
        uptime_secs: state.started_at.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Application State — shared by every request handler
// =============================================================================
//
// Owns the configuration, the gateway session pool and the candlestick
// service built on top of it. Handlers receive it as `Arc<AppState>`.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::candles::CandlestickService;
use crate::gateway::Gateway;
use crate::runtime_config::ServiceConfig;
use crate::session_pool::{PoolSettings, SessionPool};

pub struct AppState {
    pub config: ServiceConfig,
    pub candles: CandlestickService,
    pub started_at: Instant,
    /// Candlestick requests answered with 200.
    pub served: AtomicU64,
    /// Candlestick requests answered with an error.
    pub failed: AtomicU64,
}

impl AppState {
    pub fn new(config: ServiceConfig, gateway: Arc<dyn Gateway>) -> Self {
        let pool = Arc::new(SessionPool::new(gateway, PoolSettings::from_config(&config)));
        let candles = CandlestickService::new(pool, config.gateway.request_timeout());
        Self {
            config,
            candles,
            started_at: Instant::now(),
            served: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        self.candles.pool()
    }

    pub fn record(&self, ok: bool) {
        if ok {
            self.served.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

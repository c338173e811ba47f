// =============================================================================
// Candlestick Service — historical bars for one symbol, shaped for the API
// =============================================================================
//
// One request = one pool checkout + one historical-bars call:
//   1. check out a session (bounded wait, connect timeout),
//   2. ask for TRADES bars on the SMART-routed USD stock, RTH only, ending now,
//   3. bound the call with the request timeout,
//   4. empty result -> NotFound,
//   5. map bars one-to-one, preserving gateway order.
// The session goes back to the pool when the guard drops; a session whose call
// timed out or lost its connection is closed instead.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::gateway::{ContractSpec, GatewayError, HistoricalQuery};
use crate::session_pool::SessionPool;
use crate::types::{BarRequest, Candlestick};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a candlestick request produced no bars.
#[derive(Debug, Clone, PartialEq)]
pub enum CandleError {
    /// The request itself is unusable (blank symbol).
    InvalidRequest(String),
    /// The gateway answered but had no bars.
    NotFound { symbol: String },
    /// No session to the gateway could be obtained.
    Unavailable(GatewayError),
    /// The bars request did not finish in time.
    Timeout(Duration),
    /// The gateway reported an error of its own.
    Upstream(String),
}

impl From<GatewayError> for CandleError {
    fn from(e: GatewayError) -> Self {
        if e.is_connection_failure() {
            return Self::Unavailable(e);
        }
        match e {
            GatewayError::RequestTimeout(d) => Self::Timeout(d),
            GatewayError::Rejected(msg) => Self::Upstream(msg),
            other => Self::Unavailable(other),
        }
    }
}

impl std::fmt::Display for CandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::NotFound { symbol } => write!(f, "no historical data for {symbol}"),
            Self::Unavailable(e) => write!(f, "gateway unavailable: {e}"),
            Self::Timeout(d) => write!(f, "gateway timed out after {}s", d.as_secs_f64()),
            Self::Upstream(msg) => write!(f, "gateway error: {msg}"),
        }
    }
}

impl std::error::Error for CandleError {}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct CandlestickService {
    pool: Arc<SessionPool>,
    request_timeout: Duration,
}

impl CandlestickService {
    pub fn new(pool: Arc<SessionPool>, request_timeout: Duration) -> Self {
        Self {
            pool,
            request_timeout,
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Fetch historical bars for `req.symbol` and map them to the API shape.
    #[instrument(
        skip(self, req),
        fields(symbol = %req.symbol, timeframe = %req.timeframe, duration = %req.duration),
        name = "candles::fetch"
    )]
    pub async fn fetch_candlesticks(&self, req: &BarRequest) -> Result<Vec<Candlestick>, CandleError> {
        let symbol = req.symbol.trim();
        if symbol.is_empty() {
            return Err(CandleError::InvalidRequest("symbol must not be empty".into()));
        }

        let contract = ContractSpec::stock(symbol);
        let query = HistoricalQuery::trades(req.duration.as_str(), req.timeframe.as_str());

        let mut session = self.pool.acquire().await?;
        let client_id = session.client_id();

        let result = match tokio::time::timeout(
            self.request_timeout,
            session.historical_bars(&contract, &query),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(GatewayError::RequestTimeout(self.request_timeout)),
        };

        let bars = match result {
            Ok(bars) => bars,
            Err(e) => {
                if e.poisons_session() {
                    warn!(client_id, error = %e, "closing gateway session after failed call");
                    session.discard();
                }
                return Err(e.into());
            }
        };
        drop(session);

        if bars.is_empty() {
            return Err(CandleError::NotFound {
                symbol: symbol.to_string(),
            });
        }

        debug!(client_id, count = bars.len(), "historical bars fetched");
        Ok(bars.iter().map(Candlestick::from).collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{minute_bars, ScriptedGateway};
    use crate::session_pool::PoolSettings;
    use crate::types::SessionPolicy;

    fn service(gw: &ScriptedGateway, request_timeout: Duration) -> CandlestickService {
        let pool = SessionPool::new(
            Arc::new(gw.clone()),
            PoolSettings {
                policy: SessionPolicy::Pooled,
                size: 1,
                base_client_id: 1,
                connect_timeout: Duration::from_millis(200),
                acquire_timeout: Duration::from_millis(500),
            },
        );
        CandlestickService::new(Arc::new(pool), request_timeout)
    }

    #[test]
    fn gateway_errors_map_to_candle_errors() {
        for e in [
            GatewayError::NotConnected,
            GatewayError::PoolClosed,
            GatewayError::PoolExhausted(Duration::from_secs(15)),
            GatewayError::ConnectTimeout(Duration::from_secs(30)),
        ] {
            assert_eq!(CandleError::from(e.clone()), CandleError::Unavailable(e));
        }
        assert_eq!(
            CandleError::from(GatewayError::RequestTimeout(Duration::from_secs(60))),
            CandleError::Timeout(Duration::from_secs(60))
        );
        assert_eq!(
            CandleError::from(GatewayError::Rejected("bad bar size".into())),
            CandleError::Upstream("bad bar size".into())
        );
    }

    #[tokio::test]
    async fn three_bars_map_one_to_one() {
        let bars = minute_bars(3);
        let gw = ScriptedGateway::new().with_bars("AAPL", bars.clone());
        let svc = service(&gw, Duration::from_secs(1));

        let out = svc.fetch_candlesticks(&BarRequest::new("AAPL")).await.unwrap();
        assert_eq!(out.len(), 3);
        for (c, b) in out.iter().zip(&bars) {
            assert_eq!(c.time, b.time.to_iso8601());
            assert_eq!((c.open, c.high, c.low, c.close, c.volume), (b.open, b.high, b.low, b.close, b.volume));
        }
        assert_eq!(out[0].time, "2024-03-06T09:30:00-05:00");
        assert!(out.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[tokio::test]
    async fn request_descriptor_matches_the_contract() {
        let gw = ScriptedGateway::new().with_bars("AAPL", minute_bars(1));
        let svc = service(&gw, Duration::from_secs(1));

        svc.fetch_candlesticks(&BarRequest::new(" AAPL ")).await.unwrap();

        let (_, contract, query) = gw.script.requests.lock().last().cloned().unwrap();
        assert_eq!(contract, ContractSpec::stock("AAPL"));
        assert_eq!(query, HistoricalQuery::trades("1 D", "1 min"));
    }

    #[tokio::test]
    async fn gateway_order_is_preserved_even_when_unsorted() {
        let mut bars = minute_bars(4);
        bars.swap(0, 3);
        let gw = ScriptedGateway::new().with_bars("MSFT", bars.clone());
        let svc = service(&gw, Duration::from_secs(1));

        let out = svc.fetch_candlesticks(&BarRequest::new("MSFT")).await.unwrap();
        let times: Vec<String> = bars.iter().map(|b| b.time.to_iso8601()).collect();
        assert_eq!(out.iter().map(|c| c.time.clone()).collect::<Vec<_>>(), times);
    }

    #[tokio::test]
    async fn empty_result_is_not_found() {
        let gw = ScriptedGateway::new();
        let svc = service(&gw, Duration::from_secs(1));

        let err = svc.fetch_candlesticks(&BarRequest::new("ZZZZ")).await.unwrap_err();
        assert_eq!(err, CandleError::NotFound { symbol: "ZZZZ".into() });
    }

    #[tokio::test]
    async fn blank_symbol_is_rejected_before_the_gateway() {
        let gw = ScriptedGateway::new();
        let svc = service(&gw, Duration::from_secs(1));

        let err = svc.fetch_candlesticks(&BarRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, CandleError::InvalidRequest(_)));
        assert_eq!(gw.connects(), 0);
    }

    #[tokio::test]
    async fn gateway_fault_passes_its_message_through() {
        let gw = ScriptedGateway::new().rejecting_with("No security definition has been found");
        let svc = service(&gw, Duration::from_secs(1));

        let err = svc.fetch_candlesticks(&BarRequest::new("AAPL")).await.unwrap_err();
        assert_eq!(err, CandleError::Upstream("No security definition has been found".into()));
        // A domain error leaves the session usable.
        assert_eq!(svc.pool().stats().connected, 1);
    }

    #[tokio::test]
    async fn slow_request_times_out_and_drops_the_session() {
        let gw = ScriptedGateway::new()
            .with_bars("AAPL", minute_bars(3))
            .with_request_delay(Duration::from_secs(5));
        let svc = service(&gw, Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = svc.fetch_candlesticks(&BarRequest::new("AAPL")).await.unwrap_err();
        assert_eq!(err, CandleError::Timeout(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(gw.disconnects(), 1);
        assert_eq!(svc.pool().stats().discarded, 1);
    }

    #[tokio::test]
    async fn lost_connection_is_unavailable_and_drops_the_session() {
        let gw = ScriptedGateway::new()
            .with_bars("AAPL", minute_bars(3))
            .losing_connection();
        let svc = service(&gw, Duration::from_secs(1));

        let err = svc.fetch_candlesticks(&BarRequest::new("AAPL")).await.unwrap_err();
        assert_eq!(err, CandleError::Unavailable(GatewayError::NotConnected));
        assert_eq!(svc.pool().stats().discarded, 1);
        assert_eq!(svc.pool().stats().connected, 0);

        // The next request opens a fresh session instead of reusing the dead one.
        let _ = svc.fetch_candlesticks(&BarRequest::new("AAPL")).await;
        assert_eq!(gw.connects(), 2);
    }

    #[tokio::test]
    async fn unreachable_gateway_is_unavailable() {
        let gw = ScriptedGateway::new().refusing_connections();
        let svc = service(&gw, Duration::from_secs(1));

        let err = svc.fetch_candlesticks(&BarRequest::new("AAPL")).await.unwrap_err();
        assert!(matches!(err, CandleError::Unavailable(GatewayError::Connect { .. })));
    }

    #[tokio::test]
    async fn connect_timeout_is_bounded() {
        let gw = ScriptedGateway::new().with_connect_delay(Duration::from_secs(10));
        let svc = service(&gw, Duration::from_secs(1));

        let started = std::time::Instant::now();
        let err = svc.fetch_candlesticks(&BarRequest::new("AAPL")).await.unwrap_err();
        assert_eq!(
            err,
            CandleError::Unavailable(GatewayError::ConnectTimeout(Duration::from_millis(200)))
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

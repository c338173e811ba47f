// =============================================================================
// Brokerage Gateway Boundary
// =============================================================================
//
// The gateway is an external trading terminal reached over its local socket
// API. This module only defines the seam: a `Gateway` hands out sessions keyed
// by client id, and a `GatewaySession` answers historical-bars requests.
// Adapters:
//   - `tws`  — the real terminal, through the `ibapi` client (feature `tws`).
//   - `demo` — an in-process simulation with deterministic bars.
// =============================================================================

pub mod bar_spec;
pub mod demo;
mod error;
#[cfg(test)]
pub mod testing;
#[cfg(feature = "tws")]
pub mod tws;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::runtime_config::GatewayConfig;
use crate::types::{Bar, GatewayKind};

pub use error::GatewayError;

// ---------------------------------------------------------------------------
// Request descriptors
// ---------------------------------------------------------------------------

/// Instrument definition sent with a historical-bars request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractSpec {
    pub symbol: String,
    /// `STK` for stocks.
    pub security_type: String,
    /// `SMART` lets the gateway pick the routing venue.
    pub exchange: String,
    pub currency: String,
}

impl ContractSpec {
    /// A US stock routed through smart order routing.
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            security_type: "STK".to_string(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        }
    }
}

/// Kind of prices the bars are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WhatToShow {
    Trades,
}

impl std::fmt::Display for WhatToShow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trades => write!(f, "TRADES"),
        }
    }
}

/// Parameters of a historical-bars request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoricalQuery {
    /// Lookback window in the gateway grammar, e.g. `"1 D"`.
    pub duration: String,
    /// Bar size in the gateway grammar, e.g. `"1 min"`.
    pub bar_size: String,
    pub what_to_show: WhatToShow,
    /// Restrict to the primary trading session.
    pub regular_hours_only: bool,
}

impl HistoricalQuery {
    /// Trade bars over regular trading hours, ending now.
    pub fn trades(duration: impl Into<String>, bar_size: impl Into<String>) -> Self {
        Self {
            duration: duration.into(),
            bar_size: bar_size.into(),
            what_to_show: WhatToShow::Trades,
            regular_hours_only: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Factory for sessions with the gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Short adapter name for logs and the health endpoint.
    fn name(&self) -> &'static str;

    /// Open a session identified by `client_id`.
    async fn connect(&self, client_id: i32) -> Result<Box<dyn GatewaySession>, GatewayError>;
}

/// One open session with the gateway. Not shared: the owner has exclusive
/// access for the duration of every call.
#[async_trait]
pub trait GatewaySession: Send {
    fn client_id(&self) -> i32;

    fn is_connected(&self) -> bool;

    /// Request historical bars ending now. Bars come back in chronological
    /// order; an empty vector means the gateway had no data.
    async fn historical_bars(
        &mut self,
        contract: &ContractSpec,
        query: &HistoricalQuery,
    ) -> Result<Vec<Bar>, GatewayError>;

    fn disconnect(&mut self);
}

/// Build the adapter selected in `cfg`.
pub fn build(cfg: &GatewayConfig) -> anyhow::Result<Arc<dyn Gateway>> {
    match cfg.kind {
        GatewayKind::Demo => Ok(Arc::new(demo::DemoGateway::new(
            cfg.address(),
            cfg.demo_symbols.iter().cloned(),
        ))),
        #[cfg(feature = "tws")]
        GatewayKind::Tws => Ok(Arc::new(tws::TwsGateway::new(cfg.address()))),
        #[cfg(not(feature = "tws"))]
        GatewayKind::Tws => anyhow::bail!(
            "gateway kind 'tws' needs the `tws` cargo feature; rebuild with `--features tws` or set CANDLES_GATEWAY=demo"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_contract_uses_smart_routing_in_usd() {
        let c = ContractSpec::stock("AAPL");
        assert_eq!(c.symbol, "AAPL");
        assert_eq!(c.security_type, "STK");
        assert_eq!(c.exchange, "SMART");
        assert_eq!(c.currency, "USD");
    }

    #[test]
    fn trades_query_is_rth_only() {
        let q = HistoricalQuery::trades("1 D", "1 min");
        assert_eq!(q.what_to_show.to_string(), "TRADES");
        assert!(q.regular_hours_only);
        assert_eq!(q.duration, "1 D");
        assert_eq!(q.bar_size, "1 min");
    }

    #[test]
    fn build_demo_gateway() {
        let cfg = GatewayConfig {
            kind: GatewayKind::Demo,
            ..GatewayConfig::default()
        };
        let gw = build(&cfg).unwrap();
        assert_eq!(gw.name(), "demo");
    }
}

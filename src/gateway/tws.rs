// =============================================================================
// TWS Gateway — socket API of the local trading terminal via `ibapi`
// =============================================================================
//
// The wire protocol (framing, request ids, message routing) is handled by the
// `ibapi` client. This adapter only translates our request descriptors into
// its typed values and its bars back into ours.
//
// Connect on 7497 (paper terminal), 7496 (live terminal) or 4001/4002 (IB
// Gateway). The terminal must have "Enable ActiveX and Socket Clients" on.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use ibapi::market_data::historical::{self, ToDuration};
use ibapi::market_data::TradingHours;
use ibapi::prelude::*;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::bar_spec::{BarSize, BarSpecError, Lookback, LookbackUnit};
use super::{ContractSpec, Gateway, GatewayError, GatewaySession, HistoricalQuery, WhatToShow};
use crate::types::{Bar, BarTime};

/// Factory for socket sessions with the terminal at `address`.
pub struct TwsGateway {
    address: String,
}

impl TwsGateway {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Gateway for TwsGateway {
    fn name(&self) -> &'static str {
        "tws"
    }

    #[instrument(skip(self), fields(address = %self.address), name = "tws::connect")]
    async fn connect(&self, client_id: i32) -> Result<Box<dyn GatewaySession>, GatewayError> {
        let client = Client::connect(&self.address, client_id)
            .await
            .map_err(|e| GatewayError::Connect {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        info!(client_id, "connected to trading terminal");
        Ok(Box::new(TwsSession {
            client_id,
            client: Some(client),
        }))
    }
}

struct TwsSession {
    client_id: i32,
    client: Option<Client>,
}

#[async_trait]
impl GatewaySession for TwsSession {
    fn client_id(&self) -> i32 {
        self.client_id
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    #[instrument(skip(self, query), fields(client_id = self.client_id, symbol = %contract.symbol), name = "tws::historical_bars")]
    async fn historical_bars(
        &mut self,
        contract: &ContractSpec,
        query: &HistoricalQuery,
    ) -> Result<Vec<Bar>, GatewayError> {
        let client = self.client.as_ref().ok_or(GatewayError::NotConnected)?;

        let bar_size: BarSize = query
            .bar_size
            .parse()
            .map_err(|e: BarSpecError| GatewayError::Rejected(e.to_string()))?;
        let lookback: Lookback = query
            .duration
            .parse()
            .map_err(|e: BarSpecError| GatewayError::Rejected(e.to_string()))?;

        let ib_contract = Contract {
            symbol: Symbol(contract.symbol.clone()),
            security_type: SecurityType::Stock,
            exchange: Exchange(contract.exchange.clone()),
            currency: Currency(contract.currency.clone()),
            ..Default::default()
        };
        let what_to_show = match query.what_to_show {
            WhatToShow::Trades => historical::WhatToShow::Trades,
        };
        let trading_hours = if query.regular_hours_only {
            TradingHours::Regular
        } else {
            TradingHours::Extended
        };

        let data = client
            .historical_data(
                &ib_contract,
                None,
                to_ib_duration(lookback),
                to_ib_bar_size(bar_size),
                Some(what_to_show),
                trading_hours,
            )
            .await;

        let data = match data {
            Ok(data) => data,
            Err(e) if is_transport_error(&e) => {
                warn!(error = %e, "connection to trading terminal lost");
                self.client = None;
                return Err(GatewayError::NotConnected);
            }
            Err(e) => {
                warn!(error = %e, "historical data request failed");
                return Err(GatewayError::Rejected(e.to_string()));
            }
        };

        let bars: Vec<Bar> = data
            .bars
            .iter()
            .map(|b| Bar {
                time: bar_time(&b.date, bar_size),
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
            })
            .collect();

        debug!(count = bars.len(), "historical bars received");
        Ok(bars)
    }

    fn disconnect(&mut self) {
        // Dropping the client closes the socket.
        if self.client.take().is_some() {
            info!(client_id = self.client_id, "disconnected from trading terminal");
        }
    }
}

/// Socket-level failures. The session is unusable after one of these; any
/// other error is the terminal answering the request.
fn is_transport_error(e: &ibapi::Error) -> bool {
    matches!(
        e,
        ibapi::Error::Io(_)
            | ibapi::Error::ConnectionFailed
            | ibapi::Error::ConnectionReset
            | ibapi::Error::Shutdown
    )
}

fn to_ib_bar_size(size: BarSize) -> historical::BarSize {
    use historical::BarSize as Ib;
    match size {
        BarSize::Sec => Ib::Sec,
        BarSize::Sec5 => Ib::Sec5,
        BarSize::Sec15 => Ib::Sec15,
        BarSize::Sec30 => Ib::Sec30,
        BarSize::Min => Ib::Min,
        BarSize::Min2 => Ib::Min2,
        BarSize::Min3 => Ib::Min3,
        BarSize::Min5 => Ib::Min5,
        BarSize::Min15 => Ib::Min15,
        BarSize::Min20 => Ib::Min20,
        BarSize::Min30 => Ib::Min30,
        BarSize::Hour => Ib::Hour,
        BarSize::Hour2 => Ib::Hour2,
        BarSize::Hour3 => Ib::Hour3,
        BarSize::Hour4 => Ib::Hour4,
        BarSize::Hour8 => Ib::Hour8,
        BarSize::Day => Ib::Day,
        BarSize::Week => Ib::Week,
        BarSize::Month => Ib::Month,
    }
}

fn to_ib_duration(lookback: Lookback) -> historical::Duration {
    let n = lookback.amount as i32;
    match lookback.unit {
        LookbackUnit::Seconds => n.seconds(),
        LookbackUnit::Days => n.days(),
        LookbackUnit::Weeks => n.weeks(),
        LookbackUnit::Months => n.months(),
        LookbackUnit::Years => n.years(),
    }
}

/// Intraday bars keep the terminal's offset; daily and coarser bars become
/// plain dates.
fn bar_time(date: &OffsetDateTime, bar_size: BarSize) -> BarTime {
    let utc = DateTime::from_timestamp(date.unix_timestamp(), date.nanosecond()).unwrap_or_default();
    let instant = match FixedOffset::east_opt(date.offset().whole_seconds()) {
        Some(offset) => utc.with_timezone(&offset),
        None => utc.fixed_offset(),
    };
    if bar_size.is_daily_or_coarser() {
        BarTime::Date(instant.date_naive())
    } else {
        BarTime::Instant(instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_failures_are_transport_errors() {
        assert!(is_transport_error(&ibapi::Error::ConnectionReset));
        assert!(is_transport_error(&ibapi::Error::ConnectionFailed));
        assert!(is_transport_error(&ibapi::Error::Shutdown));
        assert!(!is_transport_error(&ibapi::Error::Simple(
            "No security definition has been found".into()
        )));
    }

    #[test]
    fn daily_bars_become_dates() {
        let t = OffsetDateTime::from_unix_timestamp(1_709_735_400).unwrap();
        assert_eq!(bar_time(&t, BarSize::Day).to_iso8601(), "2024-03-06");
        assert_eq!(bar_time(&t, BarSize::Min).to_iso8601(), "2024-03-06T14:30:00+00:00");
    }
}

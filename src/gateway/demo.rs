// =============================================================================
// Demo Gateway — in-process simulation of the brokerage terminal
// =============================================================================
//
// Lets the service run without a trading terminal. Behaves like the real
// gateway where it matters to callers:
//   - a client id can only be connected once at a time,
//   - unknown symbols produce an empty bar set,
//   - bar sizes / durations outside the gateway grammar are rejected,
//   - intraday bars honour the regular-trading-hours flag,
//   - oversize requests are refused.
//
// Prices are a deterministic random walk seeded by the symbol, so the same
// request at the same instant always yields the same bars.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Timelike, Utc, Weekday};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::bar_spec::{BarSize, BarSpecError, Lookback};
use super::{ContractSpec, Gateway, GatewayError, GatewaySession, HistoricalQuery};
use crate::types::{Bar, BarTime};

/// Largest bar count a single request may produce.
const MAX_BARS_PER_REQUEST: i64 = 100_000;

/// Regular session in UTC minutes-of-day (09:30–16:00 US/Eastern standard time).
const RTH_OPEN_MIN: u32 = 14 * 60 + 30;
const RTH_CLOSE_MIN: u32 = 21 * 60;

/// Offset the simulated exchange stamps intraday bars with.
const EXCHANGE_OFFSET_SECS: i32 = -5 * 3600;

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Simulated gateway with a fixed symbol universe.
pub struct DemoGateway {
    address: String,
    symbols: Arc<HashSet<String>>,
    open_client_ids: Arc<Mutex<HashSet<i32>>>,
}

impl DemoGateway {
    pub fn new(address: impl Into<String>, symbols: impl IntoIterator<Item = String>) -> Self {
        let symbols: HashSet<String> = symbols
            .into_iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        info!(count = symbols.len(), "demo gateway initialised");
        Self {
            address: address.into(),
            symbols: Arc::new(symbols),
            open_client_ids: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

#[async_trait]
impl Gateway for DemoGateway {
    fn name(&self) -> &'static str {
        "demo"
    }

    async fn connect(&self, client_id: i32) -> Result<Box<dyn GatewaySession>, GatewayError> {
        if !self.open_client_ids.lock().insert(client_id) {
            return Err(GatewayError::Connect {
                address: self.address.clone(),
                reason: format!("client id {client_id} is already in use"),
            });
        }
        debug!(client_id, "demo session opened");
        Ok(Box::new(DemoSession {
            client_id,
            symbols: self.symbols.clone(),
            open_client_ids: self.open_client_ids.clone(),
            connected: true,
        }))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct DemoSession {
    client_id: i32,
    symbols: Arc<HashSet<String>>,
    open_client_ids: Arc<Mutex<HashSet<i32>>>,
    connected: bool,
}

#[async_trait]
impl GatewaySession for DemoSession {
    fn client_id(&self) -> i32 {
        self.client_id
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn historical_bars(
        &mut self,
        contract: &ContractSpec,
        query: &HistoricalQuery,
    ) -> Result<Vec<Bar>, GatewayError> {
        if !self.connected {
            return Err(GatewayError::NotConnected);
        }
        let bar_size: BarSize = query
            .bar_size
            .parse()
            .map_err(|e: BarSpecError| GatewayError::Rejected(e.to_string()))?;
        let lookback: Lookback = query
            .duration
            .parse()
            .map_err(|e: BarSpecError| GatewayError::Rejected(e.to_string()))?;

        if !self.symbols.contains(&contract.symbol.to_uppercase()) {
            debug!(symbol = %contract.symbol, "demo gateway has no data for symbol");
            return Ok(Vec::new());
        }

        generate_bars(
            &contract.symbol.to_uppercase(),
            bar_size,
            lookback,
            query.regular_hours_only,
            Utc::now(),
        )
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.open_client_ids.lock().remove(&self.client_id);
            debug!(client_id = self.client_id, "demo session closed");
        }
    }
}

impl Drop for DemoSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Bar generation
// ---------------------------------------------------------------------------

/// Generate the bars a gateway would return for a window ending at `now`.
pub fn generate_bars(
    symbol: &str,
    bar_size: BarSize,
    lookback: Lookback,
    regular_hours_only: bool,
    now: DateTime<Utc>,
) -> Result<Vec<Bar>, GatewayError> {
    let step = bar_size.span();
    let too_much = || {
        GatewayError::Rejected(format!(
            "historical data request pacing violation: {lookback} of {bar_size} bars is too much data"
        ))
    };

    let window = lookback.span().ok_or_else(too_much)?;
    if window.num_seconds() / step.num_seconds() > MAX_BARS_PER_REQUEST {
        return Err(too_much());
    }
    let start = now.checked_sub_signed(window).ok_or_else(too_much)?;

    let stamps: Vec<BarTime> = if bar_size.is_daily_or_coarser() {
        daily_stamps(bar_size, start.date_naive(), now.date_naive())
    } else {
        intraday_stamps(step, start, now, regular_hours_only)
    };

    let seed = symbol_seed(symbol);
    let mut price = 20.0 + (seed % 480) as f64;
    let mut bars = Vec::with_capacity(stamps.len());

    for (i, time) in stamps.into_iter().enumerate() {
        let k = seed ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let open = price;
        let close = (open * (1.0 + 0.004 * unit_noise(k))).max(0.01);
        let high = open.max(close) * (1.0 + 0.002 * unit_noise(k ^ 1).abs());
        let low = open.min(close) * (1.0 - 0.002 * unit_noise(k ^ 2).abs());
        let volume = (500 + splitmix64(k ^ 3) % 50_000) as f64;

        bars.push(Bar {
            time,
            open: round_cents(open),
            high: round_cents(high),
            low: round_cents(low),
            close: round_cents(close),
            volume,
        });
        price = close;
    }

    Ok(bars)
}

fn intraday_stamps(
    step: Duration,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    regular_hours_only: bool,
) -> Vec<BarTime> {
    let step_secs = step.num_seconds();
    let Some(offset) = FixedOffset::east_opt(EXCHANGE_OFFSET_SECS) else {
        return Vec::new();
    };

    // First bar boundary at or after `start`.
    let first = start.timestamp().div_euclid(step_secs) * step_secs
        + if start.timestamp().rem_euclid(step_secs) == 0 { 0 } else { step_secs };

    let mut out = Vec::new();
    let mut ts = first;
    // Only completed bars.
    while ts + step_secs <= now.timestamp() {
        if let Some(t) = DateTime::<Utc>::from_timestamp(ts, 0) {
            let weekday = !matches!(t.weekday(), Weekday::Sat | Weekday::Sun);
            let minute = t.hour() * 60 + t.minute();
            let in_session = (RTH_OPEN_MIN..RTH_CLOSE_MIN).contains(&minute);
            if weekday && (in_session || !regular_hours_only) {
                out.push(BarTime::Instant(t.with_timezone(&offset)));
            }
        }
        ts += step_secs;
    }
    out
}

fn daily_stamps(bar_size: BarSize, start: NaiveDate, end: NaiveDate) -> Vec<BarTime> {
    let mut out = Vec::new();
    let mut d = start;
    while d <= end {
        let keep = match bar_size {
            BarSize::Week => d.weekday() == Weekday::Mon,
            BarSize::Month => d.day() == 1,
            _ => !matches!(d.weekday(), Weekday::Sat | Weekday::Sun),
        };
        if keep {
            out.push(BarTime::Date(d));
        }
        match d.succ_opt() {
            Some(next) => d = next,
            None => break,
        }
    }
    out
}

fn symbol_seed(symbol: &str) -> u64 {
    // FNV-1a
    symbol.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Uniform noise in [-1, 1].
fn unit_noise(k: u64) -> f64 {
    (splitmix64(k) >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// =============================================================================
// Shared types used across the candlestick service
// =============================================================================

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};

/// Bar size used when the caller does not pass `timeframe`.
pub const DEFAULT_TIMEFRAME: &str = "1 min";
/// Lookback window used when the caller does not pass `duration`.
pub const DEFAULT_DURATION: &str = "1 D";

// ---------------------------------------------------------------------------
// Bar timestamps
// ---------------------------------------------------------------------------

/// Timestamp of a single bar as reported by the gateway.
///
/// Daily and coarser bars are stamped with a calendar date, intraday bars with
/// an instant that keeps whatever UTC offset the gateway attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarTime {
    Date(NaiveDate),
    Instant(DateTime<FixedOffset>),
}

impl BarTime {
    /// ISO-8601 rendering. The offset is never rewritten.
    pub fn to_iso8601(&self) -> String {
        match self {
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Instant(t) => t.to_rfc3339(),
        }
    }
}

impl std::fmt::Display for BarTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl Serialize for BarTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

// ---------------------------------------------------------------------------
// Bars
// ---------------------------------------------------------------------------

/// One OHLCV sample produced by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub time: BarTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Wire shape of a bar in the HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candlestick {
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<&Bar> for Candlestick {
    fn from(bar: &Bar) -> Self {
        Self {
            time: bar.time.to_iso8601(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

fn default_timeframe() -> String {
    DEFAULT_TIMEFRAME.to_string()
}

fn default_duration() -> String {
    DEFAULT_DURATION.to_string()
}

/// A historical-bars query as received from the caller. `timeframe` and
/// `duration` are kept as the gateway's own mini-grammar strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarRequest {
    #[serde(default)]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_duration")]
    pub duration: String,
}

impl BarRequest {
    /// Request with the default timeframe and duration.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: default_timeframe(),
            duration: default_duration(),
        }
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = timeframe.into();
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = duration.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// What happens to a gateway session once a request is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Keep the session open and hand it to the next request.
    Pooled,
    /// Disconnect after every request.
    PerRequest,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::Pooled
    }
}

impl std::fmt::Display for SessionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pooled => write!(f, "pooled"),
            Self::PerRequest => write!(f, "per_request"),
        }
    }
}

/// Which gateway adapter the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// Local trading terminal via its socket API.
    Tws,
    /// In-process simulated gateway.
    Demo,
}

impl Default for GatewayKind {
    fn default() -> Self {
        if cfg!(feature = "tws") {
            Self::Tws
        } else {
            Self::Demo
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tws => write!(f, "tws"),
            Self::Demo => write!(f, "demo"),
        }
    }
}

impl std::str::FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tws" | "ib" | "gateway" => Ok(Self::Tws),
            "demo" | "sim" => Ok(Self::Demo),
            other => Err(format!("unknown gateway kind '{other}', use 'tws' or 'demo'")),
        }
    }
}

// =============================================================================
// Bar-size and lookback grammar of the gateway
// =============================================================================
//
// The HTTP layer passes `timeframe` / `duration` through untouched. Adapters
// that need typed values (the socket client, the demo generator) parse them
// here:
//
//   bar size : "<n> <unit>"  e.g. "1 min", "5 mins", "1 hour", "1 day"
//   lookback : "<n> <U>"     U in S (seconds), D, W, M (months), Y
// =============================================================================

use std::str::FromStr;

use chrono::Duration;

/// A value the gateway grammar cannot express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarSpecError(String);

impl std::fmt::Display for BarSpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BarSpecError {}

// ---------------------------------------------------------------------------
// Bar size
// ---------------------------------------------------------------------------

/// Bar sizes accepted by the gateway for historical requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarSize {
    Sec,
    Sec5,
    Sec15,
    Sec30,
    Min,
    Min2,
    Min3,
    Min5,
    Min15,
    Min20,
    Min30,
    Hour,
    Hour2,
    Hour3,
    Hour4,
    Hour8,
    Day,
    Week,
    Month,
}

impl BarSize {
    /// Nominal length of one bar. Months count as 30 days.
    pub fn span(&self) -> Duration {
        match self {
            Self::Sec => Duration::seconds(1),
            Self::Sec5 => Duration::seconds(5),
            Self::Sec15 => Duration::seconds(15),
            Self::Sec30 => Duration::seconds(30),
            Self::Min => Duration::minutes(1),
            Self::Min2 => Duration::minutes(2),
            Self::Min3 => Duration::minutes(3),
            Self::Min5 => Duration::minutes(5),
            Self::Min15 => Duration::minutes(15),
            Self::Min20 => Duration::minutes(20),
            Self::Min30 => Duration::minutes(30),
            Self::Hour => Duration::hours(1),
            Self::Hour2 => Duration::hours(2),
            Self::Hour3 => Duration::hours(3),
            Self::Hour4 => Duration::hours(4),
            Self::Hour8 => Duration::hours(8),
            Self::Day => Duration::days(1),
            Self::Week => Duration::weeks(1),
            Self::Month => Duration::days(30),
        }
    }

    /// Daily and coarser bars are stamped with a date, not an instant.
    pub fn is_daily_or_coarser(&self) -> bool {
        matches!(self, Self::Day | Self::Week | Self::Month)
    }
}

impl FromStr for BarSize {
    type Err = BarSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || BarSpecError(format!("unsupported bar size '{}'", s.trim()));

        let lower = s.trim().to_lowercase();
        let mut parts = lower.split_whitespace();
        let (n, unit) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(unit), None) => (n.parse::<u32>().map_err(|_| err())?, unit),
            _ => return Err(err()),
        };
        let unit = unit.trim_end_matches('s');

        let size = match (unit, n) {
            ("sec" | "second", 1) => Self::Sec,
            ("sec" | "second", 5) => Self::Sec5,
            ("sec" | "second", 15) => Self::Sec15,
            ("sec" | "second", 30) => Self::Sec30,
            ("min" | "minute", 1) => Self::Min,
            ("min" | "minute", 2) => Self::Min2,
            ("min" | "minute", 3) => Self::Min3,
            ("min" | "minute", 5) => Self::Min5,
            ("min" | "minute", 15) => Self::Min15,
            ("min" | "minute", 20) => Self::Min20,
            ("min" | "minute", 30) => Self::Min30,
            ("hour", 1) => Self::Hour,
            ("hour", 2) => Self::Hour2,
            ("hour", 3) => Self::Hour3,
            ("hour", 4) => Self::Hour4,
            ("hour", 8) => Self::Hour8,
            ("day", 1) => Self::Day,
            ("week", 1) => Self::Week,
            ("month", 1) => Self::Month,
            _ => return Err(err()),
        };
        Ok(size)
    }
}

impl std::fmt::Display for BarSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sec => "1 secs",
            Self::Sec5 => "5 secs",
            Self::Sec15 => "15 secs",
            Self::Sec30 => "30 secs",
            Self::Min => "1 min",
            Self::Min2 => "2 mins",
            Self::Min3 => "3 mins",
            Self::Min5 => "5 mins",
            Self::Min15 => "15 mins",
            Self::Min20 => "20 mins",
            Self::Min30 => "30 mins",
            Self::Hour => "1 hour",
            Self::Hour2 => "2 hours",
            Self::Hour3 => "3 hours",
            Self::Hour4 => "4 hours",
            Self::Hour8 => "8 hours",
            Self::Day => "1 day",
            Self::Week => "1 week",
            Self::Month => "1 month",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Lookback window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookbackUnit {
    Seconds,
    Days,
    Weeks,
    Months,
    Years,
}

/// How far back a historical request reaches from its end time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lookback {
    pub amount: u32,
    pub unit: LookbackUnit,
}

impl Lookback {
    /// Calendar span of the window. Months count as 30 days, years as 365.
    /// `None` when the window does not fit in a `Duration`.
    pub fn span(&self) -> Option<Duration> {
        let n = i64::from(self.amount);
        match self.unit {
            LookbackUnit::Seconds => Duration::try_seconds(n),
            LookbackUnit::Days => Duration::try_days(n),
            LookbackUnit::Weeks => Duration::try_weeks(n),
            LookbackUnit::Months => Duration::try_days(n.checked_mul(30)?),
            LookbackUnit::Years => Duration::try_days(n.checked_mul(365)?),
        }
    }
}

impl FromStr for Lookback {
    type Err = BarSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || BarSpecError(format!("unsupported duration '{}'", s.trim()));

        let mut parts = s.split_whitespace();
        let (n, unit) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(unit), None) => (n, unit),
            _ => return Err(err()),
        };
        let amount = n.parse::<u32>().map_err(|_| err())?;
        if amount == 0 {
            return Err(err());
        }
        let unit = match unit.to_ascii_uppercase().as_str() {
            "S" => LookbackUnit::Seconds,
            "D" => LookbackUnit::Days,
            "W" => LookbackUnit::Weeks,
            "M" => LookbackUnit::Months,
            "Y" => LookbackUnit::Years,
            _ => return Err(err()),
        };
        let lookback = Self { amount, unit };
        if lookback.span().is_none() {
            return Err(err());
        }
        Ok(lookback)
    }
}

impl std::fmt::Display for Lookback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let u = match self.unit {
            LookbackUnit::Seconds => "S",
            LookbackUnit::Days => "D",
            LookbackUnit::Weeks => "W",
            LookbackUnit::Months => "M",
            LookbackUnit::Years => "Y",
        };
        write!(f, "{} {}", self.amount, u)
    }
}

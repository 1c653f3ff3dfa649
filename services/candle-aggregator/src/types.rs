//! Core value types: instruments, price samples and OHLC candles

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a tracked pair (e.g. `WBTCETH`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Create a new instrument identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One observed price at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Instrument the price belongs to
    pub instrument: InstrumentId,
    /// When the price was observed
    pub observed_at: DateTime<Utc>,
    /// Quoted price, always positive
    pub price: Decimal,
}

impl PriceSample {
    /// Create a new sample
    pub fn new(instrument: InstrumentId, observed_at: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            instrument,
            observed_at,
            price,
        }
    }
}

/// Length of an aggregation window in epoch milliseconds.
///
/// Always strictly positive; construct with [`WindowDuration::from_millis`] or
/// the `TryFrom<Duration>` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowDuration(i64);

impl WindowDuration {
    /// One minute windows
    pub const ONE_MINUTE: Self = Self(60_000);

    /// Create a window length from milliseconds; `None` unless `ms > 0`
    #[must_use]
    pub const fn from_millis(ms: i64) -> Option<Self> {
        if ms > 0 { Some(Self(ms)) } else { None }
    }

    /// Window length in milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Window length as a chrono duration
    #[must_use]
    pub fn to_chrono(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.0)
    }

    /// Start of the window containing `ts`.
    ///
    /// `floor(ts / window) * window` on epoch milliseconds, so windows line up
    /// with absolute time regardless of when the process started.
    #[must_use]
    pub fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let start_ms = ts.timestamp_millis().div_euclid(self.0) * self.0;
        DateTime::from_timestamp_millis(start_ms).unwrap_or(ts)
    }
}

impl TryFrom<Duration> for WindowDuration {
    type Error = crate::AggregatorError;

    fn try_from(duration: Duration) -> Result<Self, Self::Error> {
        i64::try_from(duration.as_millis())
            .ok()
            .and_then(Self::from_millis)
            .ok_or_else(|| crate::AggregatorError::Configuration {
                message: format!("window duration must be at least 1ms, got {duration:?}"),
            })
    }
}

impl fmt::Display for WindowDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// OHLC candle for one instrument and one aligned window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Instrument
    pub instrument: InstrumentId,
    /// Inclusive window start
    pub window_start: DateTime<Utc>,
    /// Exclusive window end
    pub window_end: DateTime<Utc>,
    /// First price folded into the window
    pub open: Decimal,
    /// Highest price
    pub high: Decimal,
    /// Lowest price
    pub low: Decimal,
    /// Last price folded into the window
    pub close: Decimal,
    /// Number of samples folded in
    pub sample_count: u32,
}

impl Candle {
    /// Open a candle for `window_start` seeded with its first price
    pub fn open_with(
        instrument: InstrumentId,
        window_start: DateTime<Utc>,
        window: WindowDuration,
        price: Decimal,
    ) -> Self {
        Self {
            instrument,
            window_start,
            window_end: window_start + window.to_chrono(),
            open: price,
            high: price,
            low: price,
            close: price,
            sample_count: 1,
        }
    }

    /// Fold another price of the same window into the candle
    pub fn update(&mut self, price: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.sample_count += 1;
    }

    /// Check the OHLC ordering invariants
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.sample_count >= 1
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.window_start < self.window_end
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} .. {}) O:{} H:{} L:{} C:{} n={}",
            self.instrument,
            self.window_start.to_rfc3339(),
            self.window_end.to_rfc3339(),
            self.open,
            self.high,
            self.low,
            self.close,
            self.sample_count
        )
    }
}

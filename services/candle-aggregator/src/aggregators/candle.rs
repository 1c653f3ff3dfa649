//! Candle aggregator implementation
//!
//! Folds price samples of a single instrument into wall-clock aligned OHLC
//! windows. The aggregator is a plain state machine: it never blocks, never
//! performs I/O and hands sealed candles back to the caller for emission.

use crate::error::{AggregatorError, AggregatorResult};
use crate::types::{Candle, InstrumentId, PriceSample, WindowDuration};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

/// Result of folding one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoldOutcome {
    /// The sample opened a new window. `sealed` holds the previous window's
    /// candle when a boundary was crossed.
    Opened {
        /// Candle of the superseded window, ready for emission
        sealed: Option<Candle>,
    },
    /// The sample was folded into the currently open window
    Updated,
    /// The sample belongs to a window older than the open one and was dropped
    Late {
        /// Aligned window the late sample belonged to
        window_start: DateTime<Utc>,
    },
}

impl FoldOutcome {
    /// Candle sealed by this fold, if any
    #[must_use]
    pub fn into_sealed(self) -> Option<Candle> {
        match self {
            Self::Opened { sealed } => sealed,
            Self::Updated | Self::Late { .. } => None,
        }
    }
}

/// Per-instrument OHLC state machine
#[derive(Debug)]
pub struct CandleAggregator {
    instrument: InstrumentId,
    window: WindowDuration,
    open: Option<Candle>,
    /// Start of the most recently sealed window
    sealed_through: Option<DateTime<Utc>>,
}

impl CandleAggregator {
    /// Create an aggregator with no open candle
    #[must_use]
    pub const fn new(instrument: InstrumentId, window: WindowDuration) -> Self {
        Self {
            instrument,
            window,
            open: None,
            sealed_through: None,
        }
    }

    /// The currently open candle
    #[must_use]
    pub const fn current(&self) -> Option<&Candle> {
        self.open.as_ref()
    }

    /// Fold a sample into the open window.
    ///
    /// Crossing into a later window seals the open candle and returns it;
    /// windows without samples in between are skipped, never zero-filled.
    /// Samples for a window older than the open one, or older than the last
    /// sealed one, are discarded.
    pub fn fold(&mut self, sample: &PriceSample) -> AggregatorResult<FoldOutcome> {
        if sample.instrument != self.instrument {
            return Err(AggregatorError::InstrumentMismatch {
                expected: self.instrument.to_string(),
                actual: sample.instrument.to_string(),
            });
        }

        let window_start = self.window.align(sample.observed_at);

        if let Some(candle) = self.open.as_mut() {
            if candle.window_start == window_start {
                candle.update(sample.price);
                trace!(instrument = %self.instrument, price = %sample.price, "Folded sample");
                return Ok(FoldOutcome::Updated);
            }
        }

        // Open window when there is one, otherwise the last sealed window
        let floor = self
            .open
            .as_ref()
            .map(|candle| candle.window_start)
            .or(self.sealed_through);
        if let Some(floor) = floor.filter(|floor| window_start < *floor) {
            debug!(
                instrument = %self.instrument,
                sample_window = %window_start,
                floor_window = %floor,
                "Discarding late sample"
            );
            return Ok(FoldOutcome::Late { window_start });
        }

        let next = Candle::open_with(self.instrument.clone(), window_start, self.window, sample.price);
        let sealed = self.open.replace(next);
        if let Some(candle) = &sealed {
            self.sealed_through = Some(candle.window_start);
            debug!(instrument = %self.instrument, "Sealed candle {}", candle);
        }
        Ok(FoldOutcome::Opened { sealed })
    }

    /// Seal the open candle regardless of the window boundary.
    ///
    /// Returns `None` when nothing is open, so flushing twice in a row is a
    /// no-op the second time. Later samples of the flushed window open a
    /// fresh candle; samples of older windows stay late.
    pub fn flush(&mut self) -> Option<Candle> {
        let sealed = self.open.take();
        if let Some(candle) = &sealed {
            self.sealed_through = Some(candle.window_start);
            debug!(instrument = %self.instrument, "Flushed candle {}", candle);
        }
        sealed
    }
}

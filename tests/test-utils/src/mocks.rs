//! Mock price sources and sinks for testing

use anyhow::Result;
use async_trait::async_trait;
use candle_aggregator::{Candle, CandleSink, InstrumentId, PriceSource};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// One scripted answer of a [`ScriptedPriceSource`]
#[derive(Debug, Clone)]
pub enum QuoteStep {
    /// Answer with this price
    Price(Decimal),
    /// Fail with this message
    Fail(String),
    /// Wait, then answer with the inner step
    Delayed(Duration, Box<QuoteStep>),
}

impl QuoteStep {
    /// Price step from a whole number
    pub fn price(units: i64) -> Self {
        Self::Price(Decimal::new(units, 0))
    }

    /// Failing step
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    /// Delay this step by `delay`
    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// Price source that replays a script, one step per call
///
/// Once the script runs out, every call answers with the fallback price, or
/// fails when no fallback is set.
#[derive(Debug)]
pub struct ScriptedPriceSource {
    script: Mutex<VecDeque<QuoteStep>>,
    fallback: Option<Decimal>,
    calls: AtomicU32,
}

impl ScriptedPriceSource {
    /// Creates a source replaying `steps` in order
    pub fn new(steps: impl IntoIterator<Item = QuoteStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Creates a source answering with whole-number prices in order
    pub fn prices(prices: &[i64]) -> Self {
        Self::new(prices.iter().copied().map(QuoteStep::price))
    }

    /// Creates a source that always answers `price`
    pub fn constant(price: Decimal) -> Self {
        Self::new([]).with_fallback(price)
    }

    /// Answer `price` once the script is exhausted
    pub fn with_fallback(mut self, price: Decimal) -> Self {
        self.fallback = Some(price);
        self
    }

    /// Number of quotes requested so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<QuoteStep> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
    }
}

#[async_trait]
impl PriceSource for ScriptedPriceSource {
    async fn quote(&self, _instrument: &InstrumentId) -> Result<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut step = match self.next_step() {
            Some(step) => step,
            None => match self.fallback {
                Some(price) => return Ok(price),
                None => anyhow::bail!("price script exhausted"),
            },
        };

        loop {
            match step {
                QuoteStep::Price(price) => return Ok(price),
                QuoteStep::Fail(message) => anyhow::bail!(message),
                QuoteStep::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
            }
        }
    }
}

/// Sink that records every stored candle
///
/// Can be told to fail the first `n` stores or to take a while per store.
#[derive(Debug, Default)]
pub struct RecordingSink {
    stored: Mutex<Vec<Candle>>,
    attempts: AtomicU32,
    fail_first: AtomicU32,
    delay: Option<Duration>,
}

impl RecordingSink {
    /// Creates a sink that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` store calls
    pub fn failing_first(n: u32) -> Self {
        let sink = Self::default();
        sink.fail_first.store(n, Ordering::SeqCst);
        sink
    }

    /// Take `delay` for every store call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Candles stored successfully, in store order
    pub fn candles(&self) -> Vec<Candle> {
        self.stored
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Candles stored for `instrument`
    pub fn candles_for(&self, instrument: &InstrumentId) -> Vec<Candle> {
        self.candles()
            .into_iter()
            .filter(|c| &c.instrument == instrument)
            .collect()
    }

    /// Number of store calls, failed ones included
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandleSink for RecordingSink {
    async fn store(&self, candle: &Candle) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("storage unavailable");
        }

        self.stored
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(candle.clone());
        Ok(())
    }
}

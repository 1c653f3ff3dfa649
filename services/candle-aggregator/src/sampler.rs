//! Fixed-cadence price sampler
//!
//! Polls a [`PriceSource`] on a periodic ticker. Every tick spawns an
//! independent poll, so a slow or failing quote never delays the next one.
//! Completed polls are forwarded as [`SamplerEvent`]s in completion order.
//!
//! Stop policy: once [`Sampler::stop`] returns, no further event is sent.
//! Polls still in flight at that point are aborted and their results are
//! discarded.

use crate::clock::Clock;
use crate::error::SampleError;
use crate::source::PriceSource;
use crate::types::{InstrumentId, PriceSample};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sampler timing configuration
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between poll starts
    pub interval: Duration,
    /// Upper bound on a single poll
    pub timeout: Duration,
    /// Consecutive failures after which a failure is escalated; 0 disables
    pub max_consecutive_failures: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(10),
            max_consecutive_failures: 5,
        }
    }
}

/// A poll that produced no sample
#[derive(Debug)]
pub struct SampleFailure {
    /// Instrument that was polled
    pub instrument: InstrumentId,
    /// When the failed poll was issued
    pub at: DateTime<Utc>,
    /// Cause
    pub error: SampleError,
    /// Length of the current failure run, including this one
    pub consecutive: u32,
    /// Whether this failure hit the escalation threshold
    pub escalated: bool,
}

/// Outcome of one completed poll
#[derive(Debug)]
pub enum SamplerEvent {
    /// Valid price sample
    Sample(PriceSample),
    /// Failed poll
    Failure(SampleFailure),
}

/// Handle to a running sampler loop
#[derive(Debug)]
pub struct Sampler {
    instrument: InstrumentId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Start polling `source` immediately and then every `config.interval`
    pub fn start(
        instrument: InstrumentId,
        source: Arc<dyn PriceSource>,
        clock: Arc<dyn Clock>,
        config: SamplerConfig,
        events: mpsc::Sender<SamplerEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sampler(
            instrument.clone(),
            source,
            clock,
            config,
            events,
            cancel.clone(),
        ));

        Self {
            instrument,
            cancel,
            task: Some(task),
        }
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel future polls and wait for the loop to exit. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(instrument = %self.instrument, "Sampler loop panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_sampler(
    instrument: InstrumentId,
    source: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    config: SamplerConfig,
    events: mpsc::Sender<SamplerEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut polls: JoinSet<(DateTime<Utc>, Result<Decimal, SampleError>)> = JoinSet::new();
    let mut consecutive_failures = 0u32;

    info!(
        instrument = %instrument,
        interval_ms = config.interval.as_millis() as u64,
        "Sampler started"
    );

    loop {
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let observed_at = clock.now();
                let source = Arc::clone(&source);
                let poll_instrument = instrument.clone();
                let timeout = config.timeout;
                polls.spawn(async move {
                    (observed_at, poll_once(source.as_ref(), &poll_instrument, timeout).await)
                });
                continue;
            }
            Some(joined) = polls.join_next(), if !polls.is_empty() => joined,
        };

        let (observed_at, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => (clock.now(), Err(SampleError::Source(anyhow::anyhow!("poll task panicked: {e}")))),
        };

        let event = match result {
            Ok(price) => {
                consecutive_failures = 0;
                SamplerEvent::Sample(PriceSample::new(instrument.clone(), observed_at, price))
            }
            Err(error) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                let escalated = config.max_consecutive_failures > 0
                    && consecutive_failures % config.max_consecutive_failures == 0;

                if escalated {
                    error!(
                        instrument = %instrument,
                        consecutive = consecutive_failures,
                        "Price source keeps failing: {}", error
                    );
                } else {
                    warn!(
                        instrument = %instrument,
                        consecutive = consecutive_failures,
                        "Price poll failed: {}", error
                    );
                }

                SamplerEvent::Failure(SampleFailure {
                    instrument: instrument.clone(),
                    at: observed_at,
                    error,
                    consecutive: consecutive_failures,
                    escalated,
                })
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = events.send(event) => {
                if sent.is_err() {
                    debug!(instrument = %instrument, "Sample receiver dropped");
                    break;
                }
            }
        }
    }

    polls.abort_all();
    info!(instrument = %instrument, "Sampler stopped");
}

/// One bounded poll; non-positive prices count as failures
async fn poll_once(
    source: &dyn PriceSource,
    instrument: &InstrumentId,
    timeout: Duration,
) -> Result<Decimal, SampleError> {
    let price = match tokio::time::timeout(timeout, source.quote(instrument)).await {
        Ok(Ok(price)) => price,
        Ok(Err(e)) => return Err(SampleError::Source(e)),
        Err(_) => return Err(SampleError::Timeout { after: timeout }),
    };

    if price <= Decimal::ZERO {
        return Err(SampleError::InvalidPrice { price });
    }

    Ok(price)
}

//! Hand sealed candles to the sink without blocking aggregation
//!
//! Each instrument owns one emitter: a bounded queue drained by a dedicated
//! task that calls [`CandleSink::store`] once per candle, in order. A full
//! queue drops the candle instead of stalling the price stream, and a failed
//! store is logged and counted but never retried here.

use crate::metrics::Metrics;
use crate::sink::CandleSink;
use crate::types::{Candle, InstrumentId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Emission counters for one instrument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterStats {
    /// Candles accepted by the sink
    pub stored: u64,
    /// Candles the sink rejected
    pub failed: u64,
    /// Candles never handed to the sink
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    stored: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Ordered, non-blocking handoff of sealed candles to a sink
#[derive(Debug)]
pub struct Emitter {
    instrument: InstrumentId,
    tx: Option<mpsc::Sender<Candle>>,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    metrics: Metrics,
}

impl Emitter {
    /// Spawn the emit task for `instrument`
    pub fn spawn(
        instrument: InstrumentId,
        sink: Arc<dyn CandleSink>,
        capacity: usize,
        metrics: Metrics,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let task = tokio::spawn(run_emitter(
            instrument.clone(),
            sink,
            rx,
            Arc::clone(&counters),
            metrics.clone(),
        ));

        Self {
            instrument,
            tx: Some(tx),
            task: Some(task),
            counters,
            metrics,
        }
    }

    /// Queue a sealed candle. Returns `false` when it had to be dropped.
    pub fn emit(&self, candle: Candle) -> bool {
        let Some(tx) = &self.tx else {
            self.drop_candle(&candle, "emitter closed");
            return false;
        };

        match tx.try_send(candle) {
            Ok(()) => true,
            Err(TrySendError::Full(candle)) => {
                self.drop_candle(&candle, "emit queue full");
                false
            }
            Err(TrySendError::Closed(candle)) => {
                self.drop_candle(&candle, "emit task gone");
                false
            }
        }
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> EmitterStats {
        EmitterStats {
            stored: self.counters.stored.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting candles and give queued ones up to `drain_timeout` to
    /// reach the sink; whatever is still pending after that is abandoned.
    /// Idempotent.
    pub async fn close(&mut self, drain_timeout: Duration) -> EmitterStats {
        self.tx = None;

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(drain_timeout, &mut task).await {
                Ok(Ok(())) => debug!(instrument = %self.instrument, "Emitter drained"),
                Ok(Err(e)) => error!(instrument = %self.instrument, "Emit task failed: {}", e),
                Err(_) => {
                    warn!(
                        instrument = %self.instrument,
                        timeout_ms = drain_timeout.as_millis() as u64,
                        "Sink did not drain in time, abandoning pending candles"
                    );
                    task.abort();
                }
            }
        }

        self.stats()
    }

    fn drop_candle(&self, candle: &Candle, reason: &str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_dropped(&self.instrument);
        error!(instrument = %self.instrument, reason, "Dropping candle {}", candle);
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_emitter(
    instrument: InstrumentId,
    sink: Arc<dyn CandleSink>,
    mut rx: mpsc::Receiver<Candle>,
    counters: Arc<Counters>,
    metrics: Metrics,
) {
    while let Some(candle) = rx.recv().await {
        match sink.store(&candle).await {
            Ok(()) => {
                counters.stored.fetch_add(1, Ordering::Relaxed);
                metrics.record_stored(&instrument);
                debug!(instrument = %instrument, "Stored candle {}", candle);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics.record_store_failure(&instrument);
                error!(instrument = %instrument, "Failed to store candle {}: {:#}", candle, e);
            }
        }
    }
}

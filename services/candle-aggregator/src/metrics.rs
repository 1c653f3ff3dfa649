//! Prometheus metrics for sampling, aggregation and emission

use crate::types::InstrumentId;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use std::fmt;

const INSTRUMENT_LABEL: &str = "instrument";

/// Per-instrument counters, registered once per process
#[derive(Clone)]
pub struct Metrics {
    samples: IntCounterVec,
    sample_failures: IntCounterVec,
    late_samples: IntCounterVec,
    candles_sealed: IntCounterVec,
    candles_stored: IntCounterVec,
    store_failures: IntCounterVec,
    candles_dropped: IntCounterVec,
    consecutive_failures: IntGaugeVec,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create and register all metrics in `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "candle_sample_consecutive_failures",
                "Current run of failed polls per instrument",
            ),
            &[INSTRUMENT_LABEL],
        )?;
        registry.register(Box::new(consecutive_failures.clone()))?;

        Ok(Self {
            samples: counter(
                registry,
                "candle_samples_total",
                "Successful price polls",
                &[INSTRUMENT_LABEL],
            )?,
            sample_failures: counter(
                registry,
                "candle_sample_failures_total",
                "Failed price polls by failure kind",
                &[INSTRUMENT_LABEL, "kind"],
            )?,
            late_samples: counter(
                registry,
                "candle_late_samples_total",
                "Samples dropped because their window was already superseded",
                &[INSTRUMENT_LABEL],
            )?,
            candles_sealed: counter(
                registry,
                "candle_sealed_total",
                "Candles sealed by the aggregator",
                &[INSTRUMENT_LABEL],
            )?,
            candles_stored: counter(
                registry,
                "candle_stored_total",
                "Candles accepted by the sink",
                &[INSTRUMENT_LABEL],
            )?,
            store_failures: counter(
                registry,
                "candle_store_failures_total",
                "Candles the sink failed to store",
                &[INSTRUMENT_LABEL],
            )?,
            candles_dropped: counter(
                registry,
                "candle_dropped_total",
                "Candles dropped because the emit queue was full or closed",
                &[INSTRUMENT_LABEL],
            )?,
            consecutive_failures,
        })
    }

    pub(crate) fn record_sample(&self, instrument: &InstrumentId) {
        self.samples.with_label_values(&[instrument.as_str()]).inc();
        self.consecutive_failures
            .with_label_values(&[instrument.as_str()])
            .set(0);
    }

    pub(crate) fn record_sample_failure(&self, instrument: &InstrumentId, kind: &str, consecutive: u32) {
        self.sample_failures
            .with_label_values(&[instrument.as_str(), kind])
            .inc();
        self.consecutive_failures
            .with_label_values(&[instrument.as_str()])
            .set(i64::from(consecutive));
    }

    pub(crate) fn record_late(&self, instrument: &InstrumentId) {
        self.late_samples.with_label_values(&[instrument.as_str()]).inc();
    }

    pub(crate) fn record_sealed(&self, instrument: &InstrumentId) {
        self.candles_sealed.with_label_values(&[instrument.as_str()]).inc();
    }

    pub(crate) fn record_stored(&self, instrument: &InstrumentId) {
        self.candles_stored.with_label_values(&[instrument.as_str()]).inc();
    }

    pub(crate) fn record_store_failure(&self, instrument: &InstrumentId) {
        self.store_failures.with_label_values(&[instrument.as_str()]).inc();
    }

    pub(crate) fn record_dropped(&self, instrument: &InstrumentId) {
        self.candles_dropped.with_label_values(&[instrument.as_str()]).inc();
    }
}

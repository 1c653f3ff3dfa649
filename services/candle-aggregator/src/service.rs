//! Process-level composition of independent instrument streams

use crate::clock::{Clock, SystemClock};
use crate::error::{AggregatorError, AggregatorResult};
use crate::metrics::Metrics;
use crate::sink::CandleSink;
use crate::source::PriceSource;
use crate::stream::{InstrumentStream, StreamSettings, StreamSummary};
use crate::types::{Candle, InstrumentId};
use futures::future::join_all;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::info;

/// Runs one [`InstrumentStream`] per tracked instrument against a shared sink
#[derive(Debug)]
pub struct CandleService {
    settings: StreamSettings,
    sink: Arc<dyn CandleSink>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    streams: FxHashMap<InstrumentId, InstrumentStream>,
}

impl CandleService {
    /// Create a service using the system clock
    pub fn new(settings: StreamSettings, sink: Arc<dyn CandleSink>, metrics: Metrics) -> Self {
        Self::with_clock(settings, sink, metrics, Arc::new(SystemClock))
    }

    /// Create a service with a custom clock
    pub fn with_clock(
        settings: StreamSettings,
        sink: Arc<dyn CandleSink>,
        metrics: Metrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            sink,
            clock,
            metrics,
            streams: FxHashMap::default(),
        }
    }

    /// Start tracking `instrument`
    pub fn track(
        &mut self,
        instrument: InstrumentId,
        source: Arc<dyn PriceSource>,
    ) -> AggregatorResult<()> {
        if self.streams.contains_key(&instrument) {
            return Err(AggregatorError::DuplicateInstrument {
                id: instrument.to_string(),
            });
        }

        let stream = InstrumentStream::spawn(
            instrument.clone(),
            source,
            Arc::clone(&self.sink),
            Arc::clone(&self.clock),
            self.settings.clone(),
            self.metrics.clone(),
        );
        self.streams.insert(instrument, stream);
        Ok(())
    }

    /// Tracked instruments
    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentId> {
        self.streams.keys()
    }

    /// Stream for `instrument`
    #[must_use]
    pub fn stream(&self, instrument: &InstrumentId) -> Option<&InstrumentStream> {
        self.streams.get(instrument)
    }

    /// Flush every open candle now
    pub async fn flush_all(&self) -> Vec<Candle> {
        join_all(self.streams.values().map(|stream| stream.flush()))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Stop every stream, optionally flushing partial windows first.
    /// Streams shut down concurrently; calling it again is a no-op.
    pub async fn shutdown(&mut self, flush: bool) -> FxHashMap<InstrumentId, StreamSummary> {
        info!(streams = self.streams.len(), flush, "Shutting down candle service");

        let streams = std::mem::take(&mut self.streams);
        join_all(streams.into_iter().map(|(instrument, mut stream)| async move {
            let summary = stream.shutdown(flush).await;
            (instrument, summary)
        }))
        .await
        .into_iter()
        .collect()
    }
}

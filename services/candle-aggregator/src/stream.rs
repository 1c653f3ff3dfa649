//! One instrument's Sampler → Aggregator → Emitter pipeline
//!
//! The stream task is the only owner of its [`CandleAggregator`], so samples
//! of one instrument are folded strictly one at a time. Control requests
//! (flush, snapshot, shutdown) are serialized through the same task.

use crate::aggregators::{CandleAggregator, FoldOutcome};
use crate::clock::Clock;
use crate::config::AggregatorConfig;
use crate::emitter::{Emitter, EmitterStats};
use crate::error::AggregatorResult;
use crate::metrics::Metrics;
use crate::sampler::{Sampler, SamplerConfig, SamplerEvent};
use crate::sink::CandleSink;
use crate::source::PriceSource;
use crate::types::{Candle, InstrumentId, WindowDuration};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 8;
const SAMPLE_CHANNEL_CAPACITY: usize = 256;

/// Settings shared by every instrument stream
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Candle window
    pub window: WindowDuration,
    /// Sampler cadence and timeouts
    pub sampler: SamplerConfig,
    /// Emit queue length per instrument
    pub emit_queue_capacity: usize,
    /// Shutdown drain budget for queued candles
    pub emit_drain_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            window: WindowDuration::ONE_MINUTE,
            sampler: SamplerConfig::default(),
            emit_queue_capacity: 64,
            emit_drain_timeout: Duration::from_secs(5),
        }
    }
}

impl StreamSettings {
    /// Derive stream settings from service configuration
    pub fn from_config(config: &AggregatorConfig) -> AggregatorResult<Self> {
        Ok(Self {
            window: config.window()?,
            sampler: config.sampler(),
            emit_queue_capacity: config.emit_queue_capacity,
            emit_drain_timeout: config.emit_drain_timeout(),
        })
    }
}

/// Counters reported when a stream ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Samples folded into a window
    pub samples: u64,
    /// Samples dropped for arriving after their window was superseded
    pub late_samples: u64,
    /// Failed polls
    pub sample_failures: u64,
    /// Candles sealed and handed to the emitter
    pub candles_sealed: u64,
    /// Emission counters
    pub emitter: EmitterStats,
}

#[derive(Debug)]
enum Command {
    Flush(oneshot::Sender<Option<Candle>>),
    Snapshot(oneshot::Sender<Option<Candle>>),
    Shutdown { flush: bool },
}

/// Handle to a running instrument stream
#[derive(Debug)]
pub struct InstrumentStream {
    instrument: InstrumentId,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: Option<JoinHandle<StreamSummary>>,
    summary: Option<StreamSummary>,
}

impl InstrumentStream {
    /// Start sampling `source` and emitting candles to `sink`
    pub fn spawn(
        instrument: InstrumentId,
        source: Arc<dyn PriceSource>,
        sink: Arc<dyn CandleSink>,
        clock: Arc<dyn Clock>,
        settings: StreamSettings,
        metrics: Metrics,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            StreamTask {
                instrument: instrument.clone(),
                settings,
                metrics,
                summary: StreamSummary::default(),
            }
            .run(source, sink, clock, command_rx, cancel.clone()),
        );

        Self {
            instrument,
            commands,
            cancel,
            task: Some(task),
            summary: None,
        }
    }

    /// Instrument this stream tracks
    #[must_use]
    pub const fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    /// Seal and emit the open candle now, regardless of the window boundary.
    /// Returns the sealed candle, or `None` when nothing was open.
    pub async fn flush(&self) -> Option<Candle> {
        self.request(Command::Flush).await
    }

    /// Copy of the open candle
    pub async fn current(&self) -> Option<Candle> {
        self.request(Command::Snapshot).await
    }

    /// Stop sampling without flushing; the partial window is discarded.
    /// Idempotent and non-blocking.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the stream and wait for it to finish.
    ///
    /// With `flush`, samples already delivered are folded and the partial
    /// window is sealed and emitted before the emitter drains. Calling it
    /// again returns the same summary.
    pub async fn shutdown(&mut self, flush: bool) -> StreamSummary {
        if let Some(summary) = self.summary {
            return summary;
        }

        if self.commands.send(Command::Shutdown { flush }).await.is_err() {
            self.cancel.cancel();
        }

        let summary = match self.task.take() {
            Some(task) => match task.await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(instrument = %self.instrument, "Stream task failed: {}", e);
                    StreamSummary::default()
                }
            },
            None => StreamSummary::default(),
        };

        self.summary = Some(summary);
        summary
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Option<Candle>>) -> Command,
    ) -> Option<Candle> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(command(reply)).await.is_err() {
            return None;
        }
        response.await.ok().flatten()
    }
}

impl Drop for InstrumentStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct StreamTask {
    instrument: InstrumentId,
    settings: StreamSettings,
    metrics: Metrics,
    summary: StreamSummary,
}

impl StreamTask {
    async fn run(
        mut self,
        source: Arc<dyn PriceSource>,
        sink: Arc<dyn CandleSink>,
        clock: Arc<dyn Clock>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> StreamSummary {
        let (event_tx, mut events) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let mut sampler = Sampler::start(
            self.instrument.clone(),
            source,
            clock,
            self.settings.sampler.clone(),
            event_tx,
        );
        let mut emitter = Emitter::spawn(
            self.instrument.clone(),
            sink,
            self.settings.emit_queue_capacity,
            self.metrics.clone(),
        );
        let mut aggregator = CandleAggregator::new(self.instrument.clone(), self.settings.window);

        info!(
            instrument = %self.instrument,
            window = %self.settings.window,
            "Instrument stream started"
        );

        let mut flush_on_exit = false;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(command) = commands.recv() => match command {
                    Command::Flush(reply) => {
                        let sealed = aggregator.flush();
                        if let Some(candle) = &sealed {
                            self.seal(&emitter, candle.clone());
                        }
                        // Caller may have given up waiting
                        let _ = reply.send(sealed);
                    }
                    Command::Snapshot(reply) => {
                        let _ = reply.send(aggregator.current().cloned());
                    }
                    Command::Shutdown { flush } => {
                        flush_on_exit = flush;
                        break;
                    }
                },
                event = events.recv() => match event {
                    Some(event) => self.handle(&mut aggregator, &emitter, event),
                    None => {
                        warn!(instrument = %self.instrument, "Sampler exited unexpectedly");
                        break;
                    }
                },
            }
        }

        sampler.stop().await;

        if flush_on_exit {
            while let Ok(event) = events.try_recv() {
                self.handle(&mut aggregator, &emitter, event);
            }
            if let Some(candle) = aggregator.flush() {
                self.seal(&emitter, candle);
            }
        } else if let Some(partial) = aggregator.current() {
            debug!(instrument = %self.instrument, "Discarding partial window {}", partial);
        }

        self.summary.emitter = emitter.close(self.settings.emit_drain_timeout).await;

        info!(
            instrument = %self.instrument,
            samples = self.summary.samples,
            late = self.summary.late_samples,
            failures = self.summary.sample_failures,
            sealed = self.summary.candles_sealed,
            stored = self.summary.emitter.stored,
            "Instrument stream stopped"
        );
        self.summary
    }

    fn handle(&mut self, aggregator: &mut CandleAggregator, emitter: &Emitter, event: SamplerEvent) {
        match event {
            SamplerEvent::Sample(sample) => match aggregator.fold(&sample) {
                Ok(FoldOutcome::Opened { sealed }) => {
                    self.record_sample();
                    if let Some(candle) = sealed {
                        self.seal(emitter, candle);
                    }
                }
                Ok(FoldOutcome::Updated) => self.record_sample(),
                Ok(FoldOutcome::Late { .. }) => {
                    self.summary.late_samples += 1;
                    self.metrics.record_late(&self.instrument);
                }
                Err(e) => error!(instrument = %self.instrument, "Rejected sample: {}", e),
            },
            SamplerEvent::Failure(failure) => {
                self.summary.sample_failures += 1;
                self.metrics.record_sample_failure(
                    &self.instrument,
                    failure.error.kind(),
                    failure.consecutive,
                );
            }
        }
    }

    fn record_sample(&mut self) {
        self.summary.samples += 1;
        self.metrics.record_sample(&self.instrument);
    }

    fn seal(&mut self, emitter: &Emitter, candle: Candle) {
        self.summary.candles_sealed += 1;
        self.metrics.record_sealed(&self.instrument);
        emitter.emit(candle);
    }
}

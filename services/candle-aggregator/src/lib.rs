//! Candle Aggregator Service
//!
//! Turns an irregular stream of polled spot prices into wall-clock aligned
//! OHLC candles:
//! - Sampler: polls a price source on a fixed cadence, tolerating slow and
//!   failing quotes
//! - Aggregator: folds samples into one open candle per instrument and seals
//!   it exactly once when its window is superseded
//! - Emitter: hands sealed candles to a sink without stalling sampling
//!
//! Each tracked instrument runs as an independent [`InstrumentStream`];
//! [`CandleService`] composes them at the process level.

pub mod aggregators;
pub mod clock;
pub mod config;
pub mod emitter;
pub mod error;
pub mod metrics;
pub mod sampler;
pub mod service;
pub mod sink;
pub mod source;
pub mod stream;
pub mod types;

pub use aggregators::{CandleAggregator, FoldOutcome};
pub use clock::{Clock, SystemClock};
pub use crate::config::AggregatorConfig;
pub use emitter::{Emitter, EmitterStats};
pub use error::{AggregatorError, AggregatorResult, SampleError};
pub use metrics::Metrics;
pub use sampler::{SampleFailure, Sampler, SamplerConfig, SamplerEvent};
pub use service::CandleService;
pub use sink::{CandleSink, LogSink, PostgresSink};
pub use source::{PriceSource, UniswapQuoter};
pub use stream::{InstrumentStream, StreamSettings, StreamSummary};
pub use types::{Candle, InstrumentId, PriceSample, WindowDuration};

//! Aggregator implementations

pub mod candle;

pub use candle::{CandleAggregator, FoldOutcome};

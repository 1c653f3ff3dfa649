//! Error types for the candle aggregator

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Why a single price poll produced no sample.
///
/// Sample failures are recovered inside the sampler and reported as events;
/// they never stop polling.
#[derive(Error, Debug)]
pub enum SampleError {
    /// The price source returned an error
    #[error("Price source failed: {0:#}")]
    Source(#[source] anyhow::Error),

    /// The price source did not answer in time
    #[error("Price source timed out after {after:?}")]
    Timeout {
        /// Configured per-poll timeout
        after: Duration,
    },

    /// The price source answered with a non-positive price
    #[error("Invalid price: {price}")]
    InvalidPrice {
        /// The rejected value
        price: Decimal,
    },
}

impl SampleError {
    /// Short label used for metrics and logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Timeout { .. } => "timeout",
            Self::InvalidPrice { .. } => "invalid_price",
        }
    }
}

/// Aggregator-level error types
#[derive(Error, Debug)]
pub enum AggregatorError {
    /// Invalid or incomplete configuration; fatal at startup
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration
        message: String,
    },

    /// A stream for this instrument is already running
    #[error("Instrument {id} is already tracked")]
    DuplicateInstrument {
        /// The duplicated instrument identifier
        id: String,
    },

    /// A sample for another instrument reached this aggregator
    #[error("Sample for {actual} folded into aggregator for {expected}")]
    InstrumentMismatch {
        /// Instrument the aggregator tracks
        expected: String,
        /// Instrument carried by the sample
        actual: String,
    },

    /// Instrument or contract metadata could not be resolved
    #[error("Failed to resolve {what}: {reason}")]
    Resolution {
        /// What was being resolved
        what: String,
        /// Why it failed
        reason: String,
    },

    /// JSON-RPC transport or protocol error
    #[error("RPC error: {0}")]
    Rpc(String),
}

impl AggregatorError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Type alias for aggregator results
pub type AggregatorResult<T> = Result<T, AggregatorError>;

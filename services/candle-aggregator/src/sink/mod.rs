//! Candle sinks
//!
//! A sink durably stores sealed candles. Sinks are shared by every instrument
//! stream and must accept concurrent `store` calls; calls for one instrument
//! always arrive in window order.

pub mod postgres;

use crate::config::SinkConfig;
use crate::types::Candle;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

pub use postgres::PostgresSink;

/// Destination for sealed candles
#[async_trait]
pub trait CandleSink: Send + Sync + Debug {
    /// Store one sealed candle
    async fn store(&self, candle: &Candle) -> Result<()>;
}

/// Sink that only logs candles
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl CandleSink for LogSink {
    async fn store(&self, candle: &Candle) -> Result<()> {
        info!(
            instrument = %candle.instrument,
            window_start = %candle.window_start.to_rfc3339(),
            open = %candle.open,
            high = %candle.high,
            low = %candle.low,
            close = %candle.close,
            samples = candle.sample_count,
            "Candle"
        );
        Ok(())
    }
}

/// Build the sink selected in configuration
pub async fn from_config(config: &SinkConfig) -> Result<Arc<dyn CandleSink>> {
    match config {
        SinkConfig::Log => Ok(Arc::new(LogSink)),
        SinkConfig::Postgres {
            url,
            table,
            max_connections,
        } => {
            let sink = PostgresSink::connect(url, table, *max_connections).await?;
            Ok(Arc::new(sink))
        }
    }
}

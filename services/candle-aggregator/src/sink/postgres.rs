//! `PostgreSQL` candle sink
//!
//! Expects an existing table:
//!
//! ```sql
//! CREATE TABLE candles (
//!     instrument   TEXT        NOT NULL,
//!     window_start TIMESTAMPTZ NOT NULL,
//!     window_end   TIMESTAMPTZ NOT NULL,
//!     open         NUMERIC     NOT NULL,
//!     high         NUMERIC     NOT NULL,
//!     low          NUMERIC     NOT NULL,
//!     close        NUMERIC     NOT NULL,
//!     sample_count INTEGER     NOT NULL
//! );
//! ```

use super::CandleSink;
use crate::types::Candle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::{debug, info};

/// Candle sink backed by a `PostgreSQL` connection pool
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
    insert_sql: String,
}

impl PostgresSink {
    /// Connect a pool to `url` and target `table`.
    ///
    /// `table` must already be a validated identifier; it is spliced into the
    /// statement text.
    pub async fn connect(url: &str, table: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .context("Failed to connect to candle database")?;

        info!(table, "Connected to candle database");
        Ok(Self::new(pool, table))
    }

    /// Wrap an existing pool
    #[must_use]
    pub fn new(pool: PgPool, table: &str) -> Self {
        let insert_sql = format!(
            "INSERT INTO {table} (instrument, window_start, window_end, open, high, low, close, sample_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        Self { pool, insert_sql }
    }
}

#[async_trait]
impl CandleSink for PostgresSink {
    async fn store(&self, candle: &Candle) -> Result<()> {
        let sample_count =
            i32::try_from(candle.sample_count).context("sample_count does not fit INTEGER")?;

        sqlx::query(&self.insert_sql)
            .bind(candle.instrument.as_str())
            .bind(candle.window_start)
            .bind(candle.window_end)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(sample_count)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert candle for {}", candle.instrument))?;

        debug!(instrument = %candle.instrument, window_start = %candle.window_start, "Candle persisted");
        Ok(())
    }
}

//! Candle aggregator configuration

use crate::error::{AggregatorError, AggregatorResult};
use crate::sampler::SamplerConfig;
use crate::source::rpc::Address;
use crate::source::uniswap::MAINNET_QUOTER;
use crate::types::WindowDuration;
use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `CANDLES__WINDOW_SECS=300`
pub const ENV_PREFIX: &str = "CANDLES";

/// Candle aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Candle window length in seconds
    pub window_secs: u64,

    /// Time between price polls in milliseconds
    pub sample_interval_ms: u64,

    /// Upper bound on a single price poll in milliseconds
    pub sample_timeout_ms: u64,

    /// Consecutive poll failures before escalating (0 disables)
    pub max_consecutive_failures: u32,

    /// Sealed candles buffered per instrument before dropping
    pub emit_queue_capacity: usize,

    /// How long shutdown waits for queued candles to reach the sink
    pub emit_drain_timeout_ms: u64,

    /// Seal and store the partial window on shutdown
    pub flush_on_shutdown: bool,

    /// Ethereum JSON-RPC endpoint
    pub rpc_url: String,

    /// Uniswap V3 Quoter contract
    pub quoter_address: String,

    /// Tracked pools
    pub instruments: Vec<InstrumentConfig>,

    /// Where sealed candles go
    pub sink: SinkConfig,

    /// Address for the `/metrics` endpoint, disabled when unset
    pub metrics_addr: Option<String>,
}

/// Which pool token is priced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseToken {
    /// Price token0 in units of token1
    #[default]
    Token0,
    /// Price token1 in units of token0
    Token1,
}

/// Hardcoded token metadata, skipping the on-chain lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOverride {
    /// Ticker symbol
    #[serde(default)]
    pub symbol: Option<String>,
    /// ERC-20 decimals
    #[serde(default)]
    pub decimals: Option<u8>,
}

/// Per-instrument configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Instrument identifier used for storage
    pub id: String,

    /// Uniswap V3 pool contract
    pub pool_address: String,

    /// Token priced by this instrument
    #[serde(default)]
    pub base: BaseToken,

    /// token0 metadata overrides
    #[serde(default)]
    pub token0: TokenOverride,

    /// token1 metadata overrides
    #[serde(default)]
    pub token1: TokenOverride,
}

/// Candle sink selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Write candles to the log only
    Log,
    /// Insert candles into a PostgreSQL table
    Postgres {
        /// Connection URL
        url: String,
        /// Target table, optionally schema-qualified
        #[serde(default = "default_table")]
        table: String,
        /// Pool size
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_table() -> String {
    "candles".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

fn usdc() -> TokenOverride {
    TokenOverride {
        symbol: Some("USDC".to_string()),
        decimals: Some(6),
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            sample_interval_ms: 3000,
            sample_timeout_ms: 10_000,
            max_consecutive_failures: 5,
            emit_queue_capacity: 64,
            emit_drain_timeout_ms: 5000,
            flush_on_shutdown: false,
            rpc_url: String::new(),
            quoter_address: MAINNET_QUOTER.to_string(),
            instruments: vec![
                InstrumentConfig {
                    id: "WBTCETH".to_string(),
                    pool_address: "0x4585fe77225b41b697c938b018e2ac67ac5a20c0".to_string(),
                    base: BaseToken::Token0,
                    token0: TokenOverride::default(),
                    token1: TokenOverride::default(),
                },
                InstrumentConfig {
                    id: "USDCETH".to_string(),
                    pool_address: "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640".to_string(),
                    base: BaseToken::Token1,
                    token0: usdc(),
                    token1: TokenOverride::default(),
                },
                InstrumentConfig {
                    id: "WBTCUSDC".to_string(),
                    pool_address: "0x99ac8ca7087fa4a2a1fb6357269965a2014abc35".to_string(),
                    base: BaseToken::Token0,
                    token0: TokenOverride::default(),
                    token1: usdc(),
                },
            ],
            sink: SinkConfig::Log,
            metrics_addr: None,
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from an optional file, then `CANDLES__*` environment
    /// variables on top
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Check everything that must hold before polling starts
    pub fn validate(&self) -> AggregatorResult<()> {
        if self.window_secs == 0 {
            return Err(AggregatorError::config("window_secs must be greater than zero"));
        }
        if self.sample_interval_ms == 0 {
            return Err(AggregatorError::config("sample_interval_ms must be greater than zero"));
        }
        if self.sample_timeout_ms == 0 {
            return Err(AggregatorError::config("sample_timeout_ms must be greater than zero"));
        }
        if self.emit_queue_capacity == 0 {
            return Err(AggregatorError::config("emit_queue_capacity must be greater than zero"));
        }
        if self.instruments.is_empty() {
            return Err(AggregatorError::config("no instruments configured"));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(AggregatorError::config("rpc_url is required"));
        }
        self.quoter_address.parse::<Address>()?;

        let mut seen = FxHashSet::default();
        for instrument in &self.instruments {
            if instrument.id.trim().is_empty() {
                return Err(AggregatorError::config("instrument id must not be empty"));
            }
            if !seen.insert(instrument.id.as_str()) {
                return Err(AggregatorError::DuplicateInstrument {
                    id: instrument.id.clone(),
                });
            }
            instrument.pool_address.parse::<Address>()?;
        }

        if let SinkConfig::Postgres {
            url,
            table,
            max_connections,
        } = &self.sink
        {
            if url.trim().is_empty() {
                return Err(AggregatorError::config("postgres sink url is required"));
            }
            if !is_valid_table_name(table) {
                return Err(AggregatorError::config(format!("invalid table name {table:?}")));
            }
            if *max_connections == 0 {
                return Err(AggregatorError::config("max_connections must be greater than zero"));
            }
        }

        Ok(())
    }

    /// Candle window
    pub fn window(&self) -> AggregatorResult<WindowDuration> {
        WindowDuration::try_from(Duration::from_secs(self.window_secs))
    }

    /// Sampler settings
    #[must_use]
    pub fn sampler(&self) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_millis(self.sample_interval_ms),
            timeout: Duration::from_millis(self.sample_timeout_ms),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    /// Shutdown drain budget for the emitter
    #[must_use]
    pub const fn emit_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.emit_drain_timeout_ms)
    }
}

/// `name` or `schema.name`, each part a plain SQL identifier
fn is_valid_table_name(table: &str) -> bool {
    let parts: Vec<&str> = table.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

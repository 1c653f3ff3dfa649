//! Candle Aggregator Service
//!
//! Polls Uniswap V3 pools through the Quoter contract and writes one OHLC
//! candle per instrument and window to the configured sink.

use anyhow::{Context, Result};
use candle_aggregator::config::SinkConfig;
use candle_aggregator::source::JsonRpcClient;
use candle_aggregator::{
    AggregatorConfig, CandleService, InstrumentId, Metrics, StreamSettings, UniswapQuoter, sink,
};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warp::Filter;

// Constants
const SERVICE_NAME: &str = "candle-aggregator";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = SERVICE_NAME, version, about = "Aggregates polled pool prices into OHLC candles")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "CANDLES_CONFIG")]
    config: Option<PathBuf>,

    /// Ethereum JSON-RPC endpoint, overrides the configuration
    #[arg(long, env = "INFURA_URL")]
    rpc_url: Option<String>,

    /// Log candles instead of writing them to the configured sink
    #[arg(long)]
    dry_run: bool,

    /// Seal and store partial windows on shutdown
    #[arg(long)]
    flush_on_shutdown: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_tracing()?;

    info!("Starting Candle Aggregator Service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    let registry = Registry::new();
    let metrics = Metrics::new(&registry).context("Failed to register metrics")?;

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid metrics address {}: {}", addr, e))?;
        let registry = registry.clone();
        tokio::spawn(async move {
            info!("Prometheus metrics server listening on {}", addr);
            serve_metrics(addr, registry).await;
        });
    }

    let sink = sink::from_config(&config.sink).await?;
    let rpc = JsonRpcClient::new(config.rpc_url.clone())?;

    // Resolve every pool before polling starts; any failure is fatal
    let mut sources = Vec::with_capacity(config.instruments.len());
    for instrument in &config.instruments {
        let quoter = UniswapQuoter::resolve(rpc.clone(), &config.quoter_address, instrument)
            .await
            .with_context(|| format!("Failed to resolve instrument {}", instrument.id))?;
        sources.push((InstrumentId::new(&instrument.id), quoter));
    }

    let mut service = CandleService::new(StreamSettings::from_config(&config)?, sink, metrics);
    for (instrument, quoter) in sources {
        info!(instrument = %instrument, pair = %quoter.label(), pool = %quoter.pool(), "Tracking");
        service.track(instrument, Arc::new(quoter))?;
    }

    info!(
        instruments = config.instruments.len(),
        window_secs = config.window_secs,
        interval_ms = config.sample_interval_ms,
        "Pulling prices"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutdown signal received");
    let summaries = service.shutdown(config.flush_on_shutdown).await;
    for (instrument, summary) in &summaries {
        info!(
            instrument = %instrument,
            samples = summary.samples,
            candles = summary.candles_sealed,
            stored = summary.emitter.stored,
            failed = summary.emitter.failed,
            dropped = summary.emitter.dropped,
            "Final stream summary"
        );
    }

    info!("Candle Aggregator Service shutdown complete");
    Ok(())
}

/// Load file and environment configuration, apply CLI overrides, validate
fn load_config(args: &Args) -> Result<AggregatorConfig> {
    let mut config = AggregatorConfig::load(args.config.as_deref())?;

    if let Some(rpc_url) = &args.rpc_url {
        config.rpc_url.clone_from(rpc_url);
    }
    if args.dry_run {
        config.sink = SinkConfig::Log;
    }
    if args.flush_on_shutdown {
        config.flush_on_shutdown = true;
    }

    config.validate()?;
    Ok(config)
}

/// Initialize tracing with environment filter
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info,sqlx=warn", SERVICE_NAME.replace('-', "_")).into()),
        )
        .with(tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_thread_names(true))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}

async fn serve_metrics(addr: SocketAddr, registry: Registry) {
    let metrics_route = warp::path("metrics")
        .map(move || {
            let encoder = TextEncoder::new();
            let metric_families = registry.gather();
            let mut buffer = Vec::new();
            match encoder.encode(&metric_families, &mut buffer) {
                Ok(()) => String::from_utf8(buffer).unwrap_or_else(|_| "Error encoding metrics".to_string()),
                Err(_) => "Error gathering metrics".to_string(),
            }
        });

    let health_route = warp::path("health")
        .map(|| "OK");

    let routes = metrics_route.or(health_route);

    warp::serve(routes).run(addr).await;
}

//! Price sources consumed by the sampler

pub mod rpc;
pub mod uniswap;

use crate::types::InstrumentId;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt::Debug;

pub use rpc::JsonRpcClient;
pub use uniswap::{PairLabel, UniswapQuoter};

/// Anything that can quote the current price of an instrument.
///
/// Quotes are idempotent and side-effect free: the amount of the quote token
/// received for exactly one unit of the base token.
#[async_trait]
pub trait PriceSource: Send + Sync + Debug {
    /// Fetch the current price
    async fn quote(&self, instrument: &InstrumentId) -> anyhow::Result<Decimal>;
}

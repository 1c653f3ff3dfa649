//! Uniswap V3 pool quotes through the on-chain Quoter contract
//!
//! Resolution reads the pool immutables (`token0`, `token1`, `fee`) and each
//! token's `symbol`/`decimals`. Every quote then asks the Quoter how much of
//! the quote token one whole base token buys.

use super::PriceSource;
use super::rpc::{
    Address, JsonRpcClient, address_word, decode_address, decode_string, decode_uint, encode_call,
    uint_word,
};
use crate::config::{BaseToken, InstrumentConfig, TokenOverride};
use crate::error::{AggregatorError, AggregatorResult};
use crate::types::InstrumentId;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, info};

/// Uniswap V3 Quoter on Ethereum mainnet
pub const MAINNET_QUOTER: &str = "0xb27308f9F90D607463bb33eA1BeBb41C27CE5AB6";

const SEL_TOKEN0: [u8; 4] = [0x0d, 0xfe, 0x16, 0x81];
const SEL_TOKEN1: [u8; 4] = [0xd2, 0x12, 0x20, 0xa7];
const SEL_FEE: [u8; 4] = [0xdd, 0xca, 0x3f, 0x43];
const SEL_SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const SEL_DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
// quoteExactInputSingle(address,address,uint24,uint256,uint160)
const SEL_QUOTE_EXACT_INPUT_SINGLE: [u8; 4] = [0xf7, 0x72, 0x9d, 0x43];

/// Largest scale a `Decimal` can carry
const MAX_DECIMAL_SCALE: u8 = 28;

/// ERC-20 metadata of one side of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Token contract
    pub address: Address,
    /// Ticker symbol
    pub symbol: String,
    /// ERC-20 decimals
    pub decimals: u8,
}

/// Human-readable `BASE/QUOTE` label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairLabel {
    /// Base token symbol
    pub base: String,
    /// Quote token symbol
    pub quote: String,
}

impl fmt::Display for PairLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Price source backed by a Uniswap V3 pool
#[derive(Debug, Clone)]
pub struct UniswapQuoter {
    rpc: JsonRpcClient,
    quoter: Address,
    pool: Address,
    fee: u32,
    base: TokenInfo,
    quote: TokenInfo,
    amount_in: u128,
}

impl UniswapQuoter {
    /// Resolve pool and token metadata for `instrument`
    pub async fn resolve(
        rpc: JsonRpcClient,
        quoter_address: &str,
        instrument: &InstrumentConfig,
    ) -> AggregatorResult<Self> {
        let quoter: Address = quoter_address.parse()?;
        let pool: Address = instrument.pool_address.parse()?;

        info!(instrument = %instrument.id, pool = %pool, "Resolving pool");

        let token0 = decode_address(&rpc.eth_call(&pool, &encode_call(SEL_TOKEN0, &[])).await?)?;
        let token1 = decode_address(&rpc.eth_call(&pool, &encode_call(SEL_TOKEN1, &[])).await?)?;
        let fee = u32::try_from(decode_uint(&rpc.eth_call(&pool, &encode_call(SEL_FEE, &[])).await?)?)
            .map_err(|_| resolution(&instrument.id, "pool fee", "fee does not fit uint24"))?;

        let token0 = resolve_token(&rpc, token0, &instrument.token0).await?;
        let token1 = resolve_token(&rpc, token1, &instrument.token1).await?;

        let (base, quote) = match instrument.base {
            BaseToken::Token0 => (token0, token1),
            BaseToken::Token1 => (token1, token0),
        };

        if quote.decimals > MAX_DECIMAL_SCALE {
            return Err(resolution(
                &instrument.id,
                "quote token decimals",
                &format!("{} decimals exceed supported precision", quote.decimals),
            ));
        }

        let amount_in = 10u128
            .checked_pow(u32::from(base.decimals))
            .ok_or_else(|| resolution(&instrument.id, "base token decimals", "input amount overflows"))?;

        let quoter = Self {
            rpc,
            quoter,
            pool,
            fee,
            base,
            quote,
            amount_in,
        };

        info!(
            instrument = %instrument.id,
            pair = %quoter.label(),
            fee = quoter.fee,
            "Pool resolved"
        );
        Ok(quoter)
    }

    /// `BASE/QUOTE` label of the resolved pair
    #[must_use]
    pub fn label(&self) -> PairLabel {
        PairLabel {
            base: self.base.symbol.clone(),
            quote: self.quote.symbol.clone(),
        }
    }

    /// Pool this quoter reads from
    #[must_use]
    pub const fn pool(&self) -> &Address {
        &self.pool
    }

    /// Amount of quote token for one whole base token
    pub async fn fetch_price(&self) -> AggregatorResult<Decimal> {
        let data = encode_call(
            SEL_QUOTE_EXACT_INPUT_SINGLE,
            &[
                address_word(&self.base.address),
                address_word(&self.quote.address),
                uint_word(u128::from(self.fee)),
                uint_word(self.amount_in),
                uint_word(0),
            ],
        );

        let amount_out = decode_uint(&self.rpc.eth_call(&self.quoter, &data).await?)?;
        let mantissa = i128::try_from(amount_out)
            .map_err(|_| AggregatorError::Rpc(format!("quoted amount {amount_out} out of range")))?;
        let price = Decimal::try_from_i128_with_scale(mantissa, u32::from(self.quote.decimals))
            .map_err(|e| AggregatorError::Rpc(format!("quoted amount {amount_out} out of range: {e}")))?
            .normalize();

        debug!(pair = %self.label(), %price, "Quoted");
        Ok(price)
    }
}

#[async_trait]
impl PriceSource for UniswapQuoter {
    async fn quote(&self, _instrument: &InstrumentId) -> anyhow::Result<Decimal> {
        Ok(self.fetch_price().await?)
    }
}

async fn resolve_token(
    rpc: &JsonRpcClient,
    address: Address,
    overrides: &TokenOverride,
) -> AggregatorResult<TokenInfo> {
    let symbol = match &overrides.symbol {
        Some(symbol) => symbol.clone(),
        None => decode_string(&rpc.eth_call(&address, &encode_call(SEL_SYMBOL, &[])).await?)?,
    };

    let decimals = match overrides.decimals {
        Some(decimals) => decimals,
        None => {
            let raw = decode_uint(&rpc.eth_call(&address, &encode_call(SEL_DECIMALS, &[])).await?)?;
            u8::try_from(raw).map_err(|_| AggregatorError::Resolution {
                what: format!("decimals of {address}"),
                reason: format!("{raw} is not a valid ERC-20 decimals value"),
            })?
        }
    };

    Ok(TokenInfo {
        address,
        symbol,
        decimals,
    })
}

fn resolution(instrument: &str, what: &str, reason: &str) -> AggregatorError {
    AggregatorError::Resolution {
        what: format!("{what} for {instrument}"),
        reason: reason.to_string(),
    }
}

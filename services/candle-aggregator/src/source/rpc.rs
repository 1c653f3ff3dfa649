//! Minimal Ethereum JSON-RPC client and ABI word codec
//!
//! Only `eth_call` against fixed-signature view functions is needed, so
//! arguments and results are encoded as raw 32-byte ABI words.

use crate::error::{AggregatorError, AggregatorResult};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

const WORD: usize = 32;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// 20-byte account or contract address
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AggregatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| AggregatorError::config(format!("invalid address {s:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Build call data from a selector and static arguments
#[must_use]
pub fn encode_call(selector: [u8; 4], args: &[[u8; WORD]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector);
    for arg in args {
        data.extend_from_slice(arg);
    }
    data
}

/// Left-padded address word
#[must_use]
pub fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// Big-endian unsigned integer word
#[must_use]
pub fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn word_at(data: &[u8], index: usize) -> AggregatorResult<&[u8]> {
    data.get(index * WORD..(index + 1) * WORD)
        .ok_or_else(|| AggregatorError::Rpc(format!("return data too short: {} bytes", data.len())))
}

/// Decode the first return word as an address
pub fn decode_address(data: &[u8]) -> AggregatorResult<Address> {
    let word = word_at(data, 0)?;
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address(bytes))
}

/// Decode the first return word as an unsigned integer that fits in 128 bits
pub fn decode_uint(data: &[u8]) -> AggregatorResult<u128> {
    let word = word_at(data, 0)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Err(AggregatorError::Rpc("uint256 value exceeds 128 bits".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Decode an ABI `string`, falling back to a NUL-padded `bytes32` as used by
/// some older tokens
pub fn decode_string(data: &[u8]) -> AggregatorResult<String> {
    if data.len() == WORD {
        let trimmed: Vec<u8> = data.iter().copied().take_while(|b| *b != 0).collect();
        return String::from_utf8(trimmed).map_err(|e| AggregatorError::Rpc(e.to_string()));
    }

    let offset = usize::try_from(decode_uint(data)?)
        .map_err(|_| AggregatorError::Rpc("string offset overflow".to_string()))?;
    let tail = data
        .get(offset..)
        .ok_or_else(|| AggregatorError::Rpc("string offset out of range".to_string()))?;
    let len = usize::try_from(decode_uint(tail)?)
        .map_err(|_| AggregatorError::Rpc("string length overflow".to_string()))?;
    let bytes = tail
        .get(WORD..WORD + len)
        .ok_or_else(|| AggregatorError::Rpc("string data out of range".to_string()))?;

    String::from_utf8(bytes.to_vec()).map_err(|e| AggregatorError::Rpc(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC client for an Ethereum node
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    /// Create a client for the node at `url`
    pub fn new(url: impl Into<String>) -> AggregatorResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(AggregatorError::config("rpc_url is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| AggregatorError::Rpc(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Execute a read-only call against `to` at the latest block
    pub async fn eth_call(&self, to: &Address, data: &[u8]) -> AggregatorResult<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_call",
            "params": [
                { "to": to.to_string(), "data": format!("0x{}", hex::encode(data)) },
                "latest"
            ],
        });

        trace!(id, to = %to, "eth_call");

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AggregatorError::Rpc(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AggregatorError::Rpc(format!("node returned error status: {e}")))?
            .json()
            .await
            .map_err(|e| AggregatorError::Rpc(format!("malformed response: {e}")))?;

        if let Some(error) = response.error {
            return Err(AggregatorError::Rpc(format!(
                "eth_call reverted ({}): {}",
                error.code, error.message
            )));
        }

        let result = response
            .result
            .ok_or_else(|| AggregatorError::Rpc("response carries neither result nor error".to_string()))?;
        hex::decode(result.trim_start_matches("0x"))
            .map_err(|e| AggregatorError::Rpc(format!("result is not hex: {e}")))
    }
}

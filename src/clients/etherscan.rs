use crate::clients::{new_limiter, retry_policy, ClientError, DirectLimiter};
use crate::config::EtherscanConfig;
use backon::Retryable;
use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A token transfer event as reported by the Etherscan `tokentx` action.
/// All fields arrive as strings; the typed accessors below parse the ones the
/// syncer needs.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenTransfer {
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "timeStamp")]
    pub time_stamp: String,
    pub hash: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: String,
    #[serde(default)]
    pub from: String,
    #[serde(rename = "contractAddress", default)]
    pub contract_address: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "tokenSymbol", default)]
    pub token_symbol: String,
    #[serde(rename = "transactionIndex", default)]
    pub transaction_index: String,
    #[serde(default)]
    pub gas: String,
    #[serde(rename = "gasPrice")]
    pub gas_price: String,
    #[serde(rename = "gasUsed")]
    pub gas_used: String,
    #[serde(rename = "cumulativeGasUsed", default)]
    pub cumulative_gas_used: String,
    #[serde(default)]
    pub confirmations: String,
}

impl TokenTransfer {
    pub fn block_number(&self) -> Result<u64, ClientError> {
        self.block_number.parse().map_err(|_| ClientError::Parse {
            field: "blockNumber",
            value: self.block_number.clone(),
        })
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>, ClientError> {
        let secs: i64 = self.time_stamp.parse().map_err(|_| ClientError::Parse {
            field: "timeStamp",
            value: self.time_stamp.clone(),
        })?;
        DateTime::from_timestamp(secs, 0).ok_or_else(|| ClientError::Parse {
            field: "timeStamp",
            value: self.time_stamp.clone(),
        })
    }

    pub fn gas_used(&self) -> Result<U256, ClientError> {
        U256::from_dec_str(&self.gas_used).map_err(|_| ClientError::Parse {
            field: "gasUsed",
            value: self.gas_used.clone(),
        })
    }

    pub fn gas_price(&self) -> Result<U256, ClientError> {
        U256::from_dec_str(&self.gas_price).map_err(|_| ClientError::Parse {
            field: "gasPrice",
            value: self.gas_price.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    // On errors the result field carries a plain string instead of a list,
    // so it has to be parsed after checking the status.
    result: serde_json::Value,
}

#[derive(Clone)]
pub struct EtherscanClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<DirectLimiter>,
    max_retries: usize,
    retry_base_delay: Duration,
}

impl EtherscanClient {
    pub fn new(cfg: &EtherscanConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
            api_key: cfg.api_key.clone(),
            limiter: Arc::new(new_limiter(cfg.rate_limit, cfg.rate_burst)),
            max_retries: cfg.max_retries,
            retry_base_delay: cfg.retry_base_delay,
        })
    }

    /// Fetches token transfers involving `address` in `[start_block, end_block]`,
    /// sorted ascending by block. The upstream caps each page at 10k entries;
    /// an empty page means the range holds no further transfers.
    pub async fn get_token_transfers(
        &self,
        address: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<TokenTransfer>, ClientError> {
        let fetch = || async {
            self.limiter.until_ready().await;
            self.fetch_page(address, start_block, end_block).await
        };

        let transfers = fetch
            .retry(&retry_policy(self.max_retries, self.retry_base_delay))
            .when(ClientError::is_retryable)
            .notify(|err, dur| {
                warn!("Etherscan request failed, retrying in {:?}: {}", dur, err);
            })
            .await?;

        debug!(
            "Fetched {} transfers for blocks {}-{}",
            transfers.len(),
            start_block,
            end_block
        );
        Ok(transfers)
    }

    async fn fetch_page(
        &self,
        address: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<TokenTransfer>, ClientError> {
        let start_block = start_block.to_string();
        let end_block = end_block.to_string();
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("module", "account"),
                ("action", "tokentx"),
                ("address", address),
                ("sort", "asc"),
                ("startblock", start_block.as_str()),
                ("endblock", end_block.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let envelope: EtherscanResponse = resp.json().await?;
        if envelope.status != "1" {
            // An empty range is reported as status "0" rather than an empty list.
            if envelope.message.starts_with("No transactions found") {
                return Ok(Vec::new());
            }
            return Err(ClientError::Api(format!(
                "{}: {}",
                envelope.message, envelope.result
            )));
        }

        serde_json::from_value(envelope.result)
            .map_err(|e| ClientError::Api(format!("unexpected result payload: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(block: &str, ts: &str, gas_used: &str, gas_price: &str) -> TokenTransfer {
        serde_json::from_value(serde_json::json!({
            "blockNumber": block,
            "timeStamp": ts,
            "hash": "0xabc",
            "gasPrice": gas_price,
            "gasUsed": gas_used,
        }))
        .unwrap()
    }

    #[test]
    fn parses_numeric_fields() {
        let t = transfer("12376729", "1620250931", "21000", "50000000000");
        assert_eq!(t.block_number().unwrap(), 12376729);
        assert_eq!(t.timestamp().unwrap().timestamp(), 1620250931);
        assert_eq!(t.gas_used().unwrap(), U256::from(21000u64));
        assert_eq!(t.gas_price().unwrap(), U256::from(50_000_000_000u64));
    }

    #[test]
    fn rejects_malformed_numeric_fields() {
        let t = transfer("not-a-block", "soon", "lots", "0x10");
        assert!(t.block_number().is_err());
        assert!(t.timestamp().is_err());
        assert!(t.gas_used().is_err());
        // from_dec_str does not accept hex
        assert!(t.gas_price().is_err());
    }

    #[test]
    fn deserializes_full_etherscan_entry() {
        let raw = serde_json::json!({
            "blockNumber": "12376729",
            "timeStamp": "1620250931",
            "hash": "0x1b8b9e2c4a",
            "nonce": "7",
            "blockHash": "0xdead",
            "from": "0x1111",
            "contractAddress": "0x2222",
            "to": "0x3333",
            "value": "1000000",
            "tokenName": "USD Coin",
            "tokenSymbol": "USDC",
            "tokenDecimal": "6",
            "transactionIndex": "3",
            "gas": "120000",
            "gasPrice": "64000000000",
            "gasUsed": "98000",
            "cumulativeGasUsed": "403331",
            "input": "deprecated",
            "confirmations": "100"
        });
        let t: TokenTransfer = serde_json::from_value(raw).unwrap();
        assert_eq!(t.hash, "0x1b8b9e2c4a");
        assert_eq!(t.token_symbol, "USDC");
        assert_eq!(t.gas_used().unwrap(), U256::from(98000u64));
    }

    #[test]
    fn empty_range_is_not_an_error() {
        let envelope: EtherscanResponse = serde_json::from_value(serde_json::json!({
            "status": "0",
            "message": "No transactions found",
            "result": []
        }))
        .unwrap();
        assert_eq!(envelope.status, "0");
        assert!(envelope.message.starts_with("No transactions found"));
    }

    #[test]
    fn error_envelope_with_string_result_still_deserializes() {
        let envelope: EtherscanResponse = serde_json::from_value(serde_json::json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached"
        }))
        .unwrap();
        assert_eq!(envelope.message, "NOTOK");
        assert_eq!(envelope.result, serde_json::json!("Max rate limit reached"));
    }
}

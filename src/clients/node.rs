use crate::clients::{new_limiter, retry_policy, ClientError, DirectLimiter};
use crate::config::NodeConfig;
use backon::Retryable;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Block, Transaction, TransactionReceipt, U64};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// JSON-RPC client for the Ethereum node. Every call goes through the shared
/// token bucket and the exponential-backoff retry used by the other clients.
#[derive(Clone)]
pub struct NodeClient {
    provider: Arc<Provider<Http>>,
    limiter: Arc<DirectLimiter>,
    max_retries: usize,
    retry_base_delay: Duration,
}

impl NodeClient {
    pub fn new(cfg: &NodeConfig) -> Result<Self, ClientError> {
        if cfg.api_key.is_empty() {
            return Err(ClientError::InvalidEndpoint(
                "node API key cannot be empty".to_string(),
            ));
        }

        let url = format!("{}/{}", cfg.base_url, cfg.api_key);
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| ClientError::InvalidEndpoint(e.to_string()))?
            .interval(Duration::from_millis(500));

        info!("Initialized Ethereum node client against {}", cfg.base_url);

        Ok(Self {
            provider: Arc::new(provider),
            limiter: Arc::new(new_limiter(cfg.rate_limit, cfg.rate_burst)),
            max_retries: cfg.max_retries,
            retry_base_delay: cfg.retry_base_delay,
        })
    }

    pub async fn latest_block_number(&self) -> Result<u64, ClientError> {
        let call = || async {
            self.limiter.until_ready().await;
            self.provider
                .get_block_number()
                .await
                .map_err(ClientError::from)
        };

        let number = call
            .retry(&retry_policy(self.max_retries, self.retry_base_delay))
            .when(ClientError::is_retryable)
            .notify(|err, dur| {
                warn!("eth_blockNumber failed, retrying in {:?}: {}", dur, err);
            })
            .await?;

        Ok(number.as_u64())
    }

    /// Fetches a block including its full transaction objects. A block the
    /// node does not know about is an error, not an empty result.
    pub async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Block<Transaction>, ClientError> {
        let call = || async {
            self.limiter.until_ready().await;
            self.provider
                .get_block_with_txs(number)
                .await
                .map_err(ClientError::from)
        };

        let block = call
            .retry(&retry_policy(self.max_retries, self.retry_base_delay))
            .when(ClientError::is_retryable)
            .notify(move |err, dur| {
                warn!(
                    "eth_getBlockByNumber({}) failed, retrying in {:?}: {}",
                    number, dur, err
                );
            })
            .await?
            .ok_or(ClientError::BlockNotFound(number))?;

        debug!(
            "Retrieved block {} with {} transactions",
            number,
            block.transactions.len()
        );
        Ok(block)
    }

    /// One receipt per transaction in the block, via `eth_getBlockReceipts`.
    pub async fn block_receipts(&self, number: u64) -> Result<Vec<TransactionReceipt>, ClientError> {
        let call = || async {
            self.limiter.until_ready().await;
            self.provider
                .request::<_, Vec<TransactionReceipt>>("eth_getBlockReceipts", [U64::from(number)])
                .await
                .map_err(ClientError::from)
        };

        let receipts = call
            .retry(&retry_policy(self.max_retries, self.retry_base_delay))
            .when(ClientError::is_retryable)
            .notify(move |err, dur| {
                warn!(
                    "eth_getBlockReceipts({}) failed, retrying in {:?}: {}",
                    number, dur, err
                );
            })
            .await?;

        debug!("Retrieved {} receipts for block {}", receipts.len(), number);
        Ok(receipts)
    }
}

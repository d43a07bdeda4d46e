pub mod historical;
pub mod live;
pub mod pool;
pub mod supervisor;

use crate::clients::binance::BinanceClient;
use crate::clients::etherscan::EtherscanClient;
use crate::clients::node::NodeClient;
use crate::clients::ClientError;
use crate::config::Config;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("last tracked block ({last}) is greater than latest block ({head})")]
    TrackerAheadOfChain { last: u64, head: u64 },

    #[error("block {block} carries invalid timestamp {value}")]
    InvalidBlockTimestamp { block: u64, value: String },
}

/// Shared context for both sync modes: the three external clients, the store,
/// and the configuration. Clients are cheap to clone; their limiters stay
/// process-wide behind `Arc` so every caller draws from the same quota.
pub struct Syncer {
    pub config: Config,
    pub pool: PgPool,
    pub etherscan: EtherscanClient,
    pub binance: BinanceClient,
    pub node: NodeClient,
}

impl Syncer {
    pub fn new(
        config: Config,
        pool: PgPool,
        etherscan: EtherscanClient,
        binance: BinanceClient,
        node: NodeClient,
    ) -> Self {
        Self {
            config,
            pool,
            etherscan,
            binance,
            node,
        }
    }
}

use dotenv::dotenv;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Uniswap V3 WETH/USDC pool on Ethereum mainnet.
pub const WETH_USDC_POOL: &str = "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640";

/// Block in which the pool was deployed; historical sync starts here when the
/// block tracker is empty.
pub const UNISWAP_V3_DEPLOYMENT_BLOCK: u64 = 12_376_729;

pub const PRICE_SYMBOL: &str = "ETHUSDT";

const ETHERSCAN_BASE_URL: &str = "https://api.etherscan.io/api";
const BINANCE_BASE_URL: &str = "https://api.binance.com/api/v3";
const INFURA_BASE_URL: &str = "https://mainnet.infura.io/v3";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_uri: String,
    pub server_port: u16,
    pub pool_address: String,
    pub start_block: u64,
    pub price_fetch_batch_size: usize,
    pub disable_historical_sync: bool,
    pub etherscan: EtherscanConfig,
    pub binance: BinanceConfig,
    pub node: NodeConfig,
}

#[derive(Debug, Clone)]
pub struct EtherscanConfig {
    pub base_url: String,
    pub api_key: String,
    pub rate_limit: u32,
    pub rate_burst: u32,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub rate_limit: u32,
    pub rate_burst: u32,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub base_url: String,
    pub api_key: String,
    pub rate_limit: u32,
    pub rate_burst: u32,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let db_uri = required("DB_URI")?;
        let etherscan_api_key = required("ETHERSCAN_API_KEY")?;
        let infura_api_key = required("INFURA_API_KEY")?;

        let server_port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
                var: "PORT",
                value: raw.clone(),
            })?,
            Err(_) => 8080,
        };

        let disable_historical_sync = env::var("DISABLE_HISTORICAL_SYNC")
            .map(|v| v == "true")
            .unwrap_or(false);

        Ok(Self {
            db_uri,
            server_port,
            pool_address: WETH_USDC_POOL.to_string(),
            start_block: UNISWAP_V3_DEPLOYMENT_BLOCK,
            price_fetch_batch_size: 100,
            disable_historical_sync,
            etherscan: EtherscanConfig {
                base_url: ETHERSCAN_BASE_URL.to_string(),
                api_key: etherscan_api_key,
                // Etherscan free tier limit
                rate_limit: 5,
                rate_burst: 5,
                max_retries: 3,
                retry_base_delay: Duration::from_secs(1),
                timeout: Duration::from_secs(10),
            },
            binance: BinanceConfig {
                base_url: BINANCE_BASE_URL.to_string(),
                rate_limit: 20,
                rate_burst: 20,
                max_retries: 3,
                retry_base_delay: Duration::from_secs(1),
                timeout: Duration::from_secs(10),
            },
            node: NodeConfig {
                base_url: INFURA_BASE_URL.to_string(),
                api_key: infura_api_key,
                rate_limit: 10,
                rate_burst: 10,
                max_retries: 5,
                retry_base_delay: Duration::from_secs(1),
                timeout: Duration::from_secs(10),
            },
        })
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    match env::var(var) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(var)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment access is process-wide, so everything env-touching lives in
    // one test.
    #[test]
    fn from_env_reads_required_vars_and_defaults() {
        env::set_var("DB_URI", "postgres://localhost/fees");
        env::set_var("ETHERSCAN_API_KEY", "etherscan-key");
        env::set_var("INFURA_API_KEY", "infura-key");
        env::remove_var("PORT");
        env::remove_var("DISABLE_HISTORICAL_SYNC");

        let config = Config::from_env().unwrap();
        assert_eq!(config.db_uri, "postgres://localhost/fees");
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.pool_address, WETH_USDC_POOL);
        assert_eq!(config.start_block, UNISWAP_V3_DEPLOYMENT_BLOCK);
        assert_eq!(config.price_fetch_batch_size, 100);
        assert!(!config.disable_historical_sync);
        assert_eq!(config.etherscan.api_key, "etherscan-key");
        assert_eq!(config.etherscan.rate_limit, 5);
        assert_eq!(config.binance.rate_limit, 20);
        assert_eq!(config.node.api_key, "infura-key");

        env::remove_var("ETHERSCAN_API_KEY");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingVar("ETHERSCAN_API_KEY"))
        ));
        env::set_var("ETHERSCAN_API_KEY", "etherscan-key");

        env::set_var("PORT", "9090");
        env::set_var("DISABLE_HISTORICAL_SYNC", "true");
        let config = Config::from_env().unwrap();
        assert_eq!(config.server_port, 9090);
        assert!(config.disable_historical_sync);

        env::set_var("PORT", "not-a-port");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidVar { var: "PORT", .. })
        ));
        env::remove_var("PORT");
    }
}

pub mod binance;
pub mod etherscan;
pub mod node;

use backon::ExponentialBuilder;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

pub type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] ethers::providers::ProviderError),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("api error: {0}")]
    Api(String),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(String),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("no price data for {symbol} at {timestamp_ms}")]
    EmptyPriceData { symbol: String, timestamp_ms: i64 },

    #[error("invalid numeric field {field}: {value}")]
    Parse { field: &'static str, value: String },
}

impl ClientError {
    /// Transient failures worth another attempt. Anything else (4xx, parse
    /// errors, missing data) is terminal for the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Transport failures (timeouts, refused or reset connections,
            // a body cut off mid-response) retry; a malformed payload or a
            // misbuilt request will not get better on a second attempt.
            ClientError::Transport(e) => !(e.is_decode() || e.is_builder()),
            ClientError::Rpc(_) => true,
            ClientError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub(crate) fn new_limiter(rate_per_sec: u32, burst: u32) -> DirectLimiter {
    let rate = NonZeroU32::new(rate_per_sec.max(1)).unwrap();
    let burst = NonZeroU32::new(burst.max(1)).unwrap();
    RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))
}

pub(crate) fn retry_policy(max_retries: usize, base_delay: Duration) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(base_delay)
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(max_retries)
        .with_jitter()
}

use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const WEI_PER_ETH_SCALE: i64 = 18;
const USDT_SCALE: i64 = 6;

#[derive(Error, Debug)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(pub String);

#[derive(Error, Debug)]
#[error("numeric value out of range: {0}")]
pub struct NumericOutOfRange(pub String);

/// Processing status of an indexed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    PendingPrice,
    Processed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::PendingPrice => "PENDING_PRICE",
            TxStatus::Processed => "PROCESSED",
            TxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PRICE" => Ok(TxStatus::PendingPrice),
            "PROCESSED" => Ok(TxStatus::Processed),
            "FAILED" => Ok(TxStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Status of a historical sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "RUNNING",
            SyncStatus::Completed => "COMPLETED",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(SyncStatus::Running),
            "COMPLETED" => Ok(SyncStatus::Completed),
            "FAILED" => Ok(SyncStatus::Failed),
            "PAUSED" => Ok(SyncStatus::Paused),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A pool swap transaction together with its gas fee, denominated in ETH and
/// in USDT at the block-time spot rate.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub tx_hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub gas_used: U256,
    pub gas_price: U256,
    pub fee_eth: Option<BigDecimal>,
    pub fee_usdt: Option<BigDecimal>,
    pub eth_price: Option<BigDecimal>,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A freshly observed transaction, awaiting price enrichment.
    pub fn new_pending(
        tx_hash: String,
        block_number: u64,
        timestamp: DateTime<Utc>,
        gas_used: U256,
        gas_price: U256,
    ) -> Self {
        let now = Utc::now();
        Self {
            tx_hash,
            block_number,
            timestamp,
            gas_used,
            gas_price,
            fee_eth: None,
            fee_usdt: None,
            eth_price: None,
            status: TxStatus::PendingPrice,
            created_at: now,
            updated_at: now,
        }
    }

    /// Computes the fee fields from the ETH/USDT rate and marks the
    /// transaction processed.
    ///
    /// fee_wei = gas_used * gas_price, carried exactly;
    /// fee_eth = fee_wei / 10^18 at 18 fractional digits;
    /// fee_usdt = fee_eth * eth_price rounded to 6 fractional digits.
    pub fn update_prices(&mut self, eth_price: &BigDecimal) {
        let fee_wei = self.gas_used * self.gas_price;
        let fee_eth = BigDecimal::new(u256_to_bigint(&fee_wei), WEI_PER_ETH_SCALE);
        let fee_usdt = (&fee_eth * eth_price).with_scale_round(USDT_SCALE, RoundingMode::HalfUp);

        self.eth_price = Some(eth_price.with_scale_round(USDT_SCALE, RoundingMode::HalfUp));
        self.fee_eth = Some(fee_eth);
        self.fee_usdt = Some(fee_usdt);
        self.status = TxStatus::Processed;
        self.updated_at = Utc::now();
    }

    /// Records that the price lookup for this transaction failed; fee fields
    /// stay unset so the record can be re-driven later.
    pub fn mark_price_failed(&mut self) {
        self.status = TxStatus::Failed;
        self.updated_at = Utc::now();
    }
}

/// Journal of one historical back-fill run over an inclusive block range.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub id: i64,
    pub start_block: u64,
    pub end_block: u64,
    pub last_processed_block: u64,
    pub transactions_processed: u64,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub fn u256_to_decimal(value: &U256) -> BigDecimal {
    BigDecimal::from(u256_to_bigint(value))
}

pub fn decimal_to_u256(value: &BigDecimal) -> Result<U256, NumericOutOfRange> {
    let (int, _) = value.with_scale(0).into_bigint_and_exponent();
    U256::from_dec_str(&int.to_string()).map_err(|_| NumericOutOfRange(value.to_string()))
}

fn u256_to_bigint(value: &U256) -> BigInt {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigInt::from_bytes_be(Sign::Plus, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(gas_used: u64, gas_price: u64) -> Transaction {
        Transaction::new_pending(
            "0x123".to_string(),
            100,
            Utc::now(),
            U256::from(gas_used),
            U256::from(gas_price),
        )
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn update_prices_simple_transfer() {
        // 21000 gas at 50 gwei priced at 2000.50 USDT/ETH
        let mut tx = pending(21_000, 50_000_000_000);
        tx.update_prices(&dec("2000.50"));

        assert_eq!(tx.status, TxStatus::Processed);
        assert_eq!(tx.fee_eth.clone().unwrap(), dec("0.00105"));
        assert_eq!(tx.fee_usdt.clone().unwrap(), dec("2.100525"));
        assert_eq!(tx.eth_price.clone().unwrap(), dec("2000.50"));
    }

    #[test]
    fn update_prices_contract_interaction() {
        // 300000 gas at 100 gwei priced at 1850.75 USDT/ETH
        let mut tx = pending(300_000, 100_000_000_000);
        tx.update_prices(&dec("1850.75"));

        assert_eq!(tx.status, TxStatus::Processed);
        assert_eq!(tx.fee_eth.clone().unwrap(), dec("0.03"));
        assert_eq!(tx.fee_usdt.clone().unwrap(), dec("55.5225"));
    }

    #[test]
    fn update_prices_zero_gas_still_processes() {
        let mut tx = pending(0, 0);
        tx.update_prices(&dec("2000.50"));

        assert_eq!(tx.status, TxStatus::Processed);
        assert_eq!(tx.fee_eth.clone().unwrap(), dec("0"));
        assert_eq!(tx.fee_usdt.clone().unwrap(), dec("0"));
    }

    #[test]
    fn update_prices_rounds_usdt_to_six_digits() {
        // 1 wei of gas at a price with many fractional digits
        let mut tx = pending(1, 1);
        tx.update_prices(&dec("1999.999999"));

        // 1e-18 ETH * ~2000 rounds to zero at 6 digits
        assert_eq!(tx.fee_usdt.clone().unwrap(), dec("0"));
        assert_eq!(tx.fee_eth.clone().unwrap(), dec("0.000000000000000001"));
    }

    #[test]
    fn update_prices_refreshes_updated_at() {
        let mut tx = pending(21_000, 1_000_000_000);
        let before = tx.updated_at;
        tx.update_prices(&dec("1000"));
        assert!(tx.updated_at >= before);
    }

    #[test]
    fn mark_price_failed_leaves_fees_unset() {
        let mut tx = pending(21_000, 1_000_000_000);
        tx.mark_price_failed();

        assert_eq!(tx.status, TxStatus::Failed);
        assert!(tx.fee_eth.is_none());
        assert!(tx.fee_usdt.is_none());
        assert!(tx.eth_price.is_none());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [TxStatus::PendingPrice, TxStatus::Processed, TxStatus::Failed] {
            assert_eq!(status.as_str().parse::<TxStatus>().unwrap(), status);
        }
        for status in [
            SyncStatus::Running,
            SyncStatus::Completed,
            SyncStatus::Failed,
            SyncStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<TxStatus>().is_err());
    }

    #[test]
    fn u256_decimal_round_trip() {
        let big = U256::from_dec_str("115792089237316195423570985008687907853269").unwrap();
        let as_decimal = u256_to_decimal(&big);
        assert_eq!(decimal_to_u256(&as_decimal).unwrap(), big);
    }
}

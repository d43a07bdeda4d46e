use crate::models::{Transaction, TxStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Wire form of a stored transaction. Big integers render as 0x-hex strings;
/// decimals as fixed-point strings (18 digits for the ETH fee, 6 for the USDT
/// side). Fee fields of an unpriced record render empty.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub tx_hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub gas_used: String,
    pub gas_price: String,
    pub fee_eth: String,
    pub fee_usdt: String,
    pub eth_price: String,
    pub status: TxStatus,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        Self {
            tx_hash: tx.tx_hash,
            block_number: tx.block_number,
            timestamp: tx.timestamp,
            gas_used: format!("{:#x}", tx.gas_used),
            gas_price: format!("{:#x}", tx.gas_price),
            fee_eth: fixed_point(&tx.fee_eth, 18),
            fee_usdt: fixed_point(&tx.fee_usdt, 6),
            eth_price: fixed_point(&tx.eth_price, 6),
            status: tx.status,
        }
    }
}

fn fixed_point(value: &Option<BigDecimal>, scale: i64) -> String {
    match value {
        Some(v) => v.with_scale(scale).to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use std::str::FromStr;

    fn stored_transaction() -> Transaction {
        let mut tx = Transaction::new_pending(
            "0x1b8b".to_string(),
            12_376_729,
            Utc::now(),
            U256::from(21_000u64),
            U256::from(50_000_000_000u64),
        );
        tx.update_prices(&BigDecimal::from_str("2000.50").unwrap());
        tx
    }

    #[test]
    fn renders_big_ints_as_hex() {
        let resp = TransactionResponse::from(stored_transaction());
        assert_eq!(resp.gas_used, "0x5208");
        assert_eq!(resp.gas_price, "0xba43b7400");
    }

    #[test]
    fn renders_decimals_as_fixed_point() {
        let resp = TransactionResponse::from(stored_transaction());
        assert_eq!(resp.fee_eth, "0.001050000000000000");
        assert_eq!(resp.fee_usdt, "2.100525");
        assert_eq!(resp.eth_price, "2000.500000");
    }

    #[test]
    fn unpriced_record_renders_empty_fee_fields() {
        let mut tx = stored_transaction();
        tx.fee_eth = None;
        tx.fee_usdt = None;
        tx.eth_price = None;
        tx.status = TxStatus::Failed;

        let resp = TransactionResponse::from(tx);
        assert_eq!(resp.fee_eth, "");
        assert_eq!(resp.fee_usdt, "");
        assert_eq!(resp.eth_price, "");
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let resp = TransactionResponse::from(stored_transaction());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "PROCESSED");
    }
}

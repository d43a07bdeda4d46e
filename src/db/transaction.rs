use crate::models::{decimal_to_u256, u256_to_decimal, Transaction, TxStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};

// Postgres caps bind parameters at 65535 per statement; 11 columns per row
// keeps this chunk size comfortably below it.
const UPSERT_CHUNK_SIZE: usize = 1000;

/// Upserts a batch by tx_hash. The whole call commits atomically; a replayed
/// batch overwrites rows in place and never duplicates them. `created_at`
/// keeps its first-seen value.
pub async fn save_transactions(pool: &PgPool, txs: &[Transaction]) -> Result<(), sqlx::Error> {
    if txs.is_empty() {
        return Ok(());
    }

    let mut db_tx = pool.begin().await?;

    for chunk in txs.chunks(UPSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO transactions \
             (tx_hash, block_number, timestamp, gas_used, gas_price, \
              fee_eth, fee_usdt, eth_price, status, created_at, updated_at) ",
        );

        builder.push_values(chunk, |mut row, tx| {
            row.push_bind(&tx.tx_hash)
                .push_bind(tx.block_number as i64)
                .push_bind(tx.timestamp)
                .push_bind(u256_to_decimal(&tx.gas_used))
                .push_bind(u256_to_decimal(&tx.gas_price))
                .push_bind(&tx.fee_eth)
                .push_bind(&tx.fee_usdt)
                .push_bind(&tx.eth_price)
                .push_bind(tx.status.as_str())
                .push_bind(tx.created_at)
                .push_bind(tx.updated_at);
        });

        builder.push(
            " ON CONFLICT (tx_hash) DO UPDATE SET \
             block_number = EXCLUDED.block_number, \
             timestamp = EXCLUDED.timestamp, \
             gas_used = EXCLUDED.gas_used, \
             gas_price = EXCLUDED.gas_price, \
             fee_eth = EXCLUDED.fee_eth, \
             fee_usdt = EXCLUDED.fee_usdt, \
             eth_price = EXCLUDED.eth_price, \
             status = EXCLUDED.status, \
             updated_at = EXCLUDED.updated_at",
        );

        builder.build().execute(&mut *db_tx).await?;
    }

    db_tx.commit().await?;
    Ok(())
}

pub async fn get_transaction(
    pool: &PgPool,
    tx_hash: &str,
) -> Result<Option<Transaction>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT tx_hash, block_number, timestamp, gas_used, gas_price, \
                fee_eth, fee_usdt, eth_price, status, created_at, updated_at \
         FROM transactions WHERE tx_hash = $1",
    )
    .bind(tx_hash)
    .fetch_optional(pool)
    .await?;

    row.map(|r| transaction_from_row(&r)).transpose()
}

pub async fn update_transaction_status(
    pool: &PgPool,
    tx_hash: &str,
    status: TxStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE transactions SET status = $2, updated_at = NOW() WHERE tx_hash = $1")
        .bind(tx_hash)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, sqlx::Error> {
    let gas_used: BigDecimal = row.try_get("gas_used")?;
    let gas_price: BigDecimal = row.try_get("gas_price")?;
    let status: String = row.try_get("status")?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
    let block_number: i64 = row.try_get("block_number")?;

    Ok(Transaction {
        tx_hash: row.try_get("tx_hash")?,
        block_number: block_number as u64,
        timestamp,
        gas_used: decimal_to_u256(&gas_used).map_err(|e| decode_error("gas_used", e))?,
        gas_price: decimal_to_u256(&gas_price).map_err(|e| decode_error("gas_price", e))?,
        fee_eth: row.try_get("fee_eth")?,
        fee_usdt: row.try_get("fee_usdt")?,
        eth_price: row.try_get("eth_price")?,
        status: status.parse().map_err(|e| decode_error("status", e))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_error(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS_PER_ROW: usize = 11;
    const PG_BIND_LIMIT: usize = 65_535;

    #[test]
    fn upsert_chunks_stay_under_the_bind_limit() {
        assert!(UPSERT_CHUNK_SIZE * COLUMNS_PER_ROW < PG_BIND_LIMIT);
    }
}

pub mod block_tracker;
pub mod connection;
pub mod migration;
pub mod sync_progress;
pub mod transaction;

/// Idempotent schema bootstrap, executed statement by statement at boot.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS transactions (
        tx_hash VARCHAR(66) PRIMARY KEY,
        block_number BIGINT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        gas_used NUMERIC(78,0) NOT NULL,
        gas_price NUMERIC(78,0) NOT NULL,
        fee_eth NUMERIC(38,18),
        fee_usdt NUMERIC(38,6),
        eth_price NUMERIC(38,6),
        status VARCHAR(20) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block_number
        ON transactions(block_number)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_timestamp
        ON transactions(timestamp)",
    "CREATE TABLE IF NOT EXISTS sync_progress (
        id BIGSERIAL PRIMARY KEY,
        start_block BIGINT NOT NULL,
        end_block BIGINT NOT NULL,
        last_processed_block BIGINT NOT NULL,
        transactions_processed BIGINT NOT NULL DEFAULT 0,
        status VARCHAR(20) NOT NULL,
        error_message TEXT,
        completed_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_progress_status
        ON sync_progress(status)",
    "CREATE TABLE IF NOT EXISTS block_tracker (
        id SMALLINT PRIMARY KEY,
        block_number BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
];

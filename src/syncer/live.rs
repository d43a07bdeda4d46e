use crate::config::PRICE_SYMBOL;
use crate::db;
use crate::models::Transaction;
use crate::syncer::{pool, SyncError, Syncer};
use chrono::{DateTime, Utc};
use ethers::types::{Block, Transaction as EthTransaction, TransactionReceipt, H256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const BLOCK_BUFFER_SIZE: usize = 100;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tails the chain head forever: one poller feeding block numbers into a
/// bounded channel, one processor draining it in order. Returns once the
/// token cancels and both tasks have wound down.
pub async fn run(syncer: Arc<Syncer>, start_from: u64, token: CancellationToken) {
    let (block_tx, block_rx) = mpsc::channel(BLOCK_BUFFER_SIZE);

    let poller = tokio::spawn(block_poller(
        syncer.clone(),
        block_tx,
        start_from,
        token.clone(),
    ));
    let processor = tokio::spawn(block_processor(syncer, block_rx, token));

    let _ = tokio::join!(poller, processor);
    info!("Live sync stopped");
}

/// Polls the head once per second and emits every block number above
/// `last_seen`. Head-fetch errors log and wait for the next tick.
async fn block_poller(
    syncer: Arc<Syncer>,
    blocks: mpsc::Sender<u64>,
    mut last_seen: u64,
    token: CancellationToken,
) {
    let mut ticker = interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let head = match syncer.node.latest_block_number().await {
                    Ok(head) => head,
                    Err(e) => {
                        error!("Failed to get latest block: {}", e);
                        continue;
                    }
                };

                for number in (last_seen + 1)..=head {
                    tokio::select! {
                        sent = blocks.send(number) => {
                            if sent.is_err() {
                                info!("Block channel closed, stopping poller");
                                return;
                            }
                            last_seen = number;
                        }
                        _ = token.cancelled() => {
                            info!("Shutting down block poller");
                            return;
                        }
                    }
                }
            }
            _ = token.cancelled() => {
                info!("Shutting down block poller");
                return;
            }
        }
    }
}

/// Serial consumer: blocks are persisted in arrival order, and the tracker
/// only advances once a block is fully stored. A failed block logs and is
/// left for the post-restart back-fill.
async fn block_processor(
    syncer: Arc<Syncer>,
    mut blocks: mpsc::Receiver<u64>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            received = blocks.recv() => {
                match received {
                    Some(number) => {
                        if let Err(e) = process_block(&syncer, number).await {
                            error!("Error processing block {}: {}", number, e);
                        }
                    }
                    None => {
                        info!("Block channel closed, stopping processor");
                        return;
                    }
                }
            }
            _ = token.cancelled() => {
                info!("Shutting down block processor");
                return;
            }
        }
    }
}

async fn process_block(syncer: &Syncer, number: u64) -> Result<(), SyncError> {
    debug!("Processing live block {}", number);

    let block = syncer.node.block_with_transactions(number).await?;
    let receipts = syncer.node.block_receipts(number).await?;
    let receipt_map: HashMap<H256, TransactionReceipt> = receipts
        .into_iter()
        .map(|receipt| (receipt.transaction_hash, receipt))
        .collect();

    let block_time = block_timestamp(&block, number)?;
    let mut swaps = filter_pool_transactions(
        &block,
        &receipt_map,
        number,
        block_time,
        &syncer.config.pool_address,
    );

    if !swaps.is_empty() {
        let kline = syncer.binance.get_price(PRICE_SYMBOL, block_time).await?;
        for tx in swaps.iter_mut() {
            tx.update_prices(&kline.close);
        }
        db::transaction::save_transactions(&syncer.pool, &swaps).await?;
        info!("Persisted {} pool swaps from block {}", swaps.len(), number);
    }

    db::block_tracker::update_last_tracked_block(&syncer.pool, number).await?;
    Ok(())
}

fn block_timestamp(block: &Block<EthTransaction>, number: u64) -> Result<DateTime<Utc>, SyncError> {
    let seconds = block.timestamp.low_u64() as i64;
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| SyncError::InvalidBlockTimestamp {
        block: number,
        value: block.timestamp.to_string(),
    })
}

/// Keeps the transactions whose receipt carries at least one log emitted by
/// the tracked pool, built from the receipt's gas_used and effective gas
/// price. Transactions without a receipt, or with a receipt missing gas
/// fields, are skipped.
fn filter_pool_transactions(
    block: &Block<EthTransaction>,
    receipts: &HashMap<H256, TransactionReceipt>,
    block_number: u64,
    block_time: DateTime<Utc>,
    pool_address: &str,
) -> Vec<Transaction> {
    let mut swaps = Vec::new();

    for tx in &block.transactions {
        let Some(receipt) = receipts.get(&tx.hash) else {
            continue;
        };

        let touches_pool = receipt
            .logs
            .iter()
            .any(|log| pool::is_tracked_pool(pool_address, &format!("{:#x}", log.address)));
        if !touches_pool {
            continue;
        }

        let Some(gas_used) = receipt.gas_used else {
            warn!("Receipt for {:#x} is missing gas_used, skipping", tx.hash);
            continue;
        };
        let Some(gas_price) = receipt.effective_gas_price else {
            warn!(
                "Receipt for {:#x} is missing effective gas price, skipping",
                tx.hash
            );
            continue;
        };

        swaps.push(Transaction::new_pending(
            format!("{:#x}", tx.hash),
            block_number,
            block_time,
            gas_used,
            gas_price,
        ));
    }

    swaps
}

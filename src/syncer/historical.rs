use crate::clients::binance::BinanceClient;
use crate::clients::etherscan::TokenTransfer;
use crate::config::PRICE_SYMBOL;
use crate::db;
use crate::models::{SyncProgress, SyncStatus, Transaction};
use crate::syncer::Syncer;
use chrono::Utc;
use futures::future;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Backoff after an upstream fetch failure. The run returns while still
/// RUNNING so the next boot resumes it from the same cursor.
const FETCH_COOLDOWN: Duration = Duration::from_secs(10);

/// Drives one back-fill run to completion. Every iteration fetches a page of
/// token transfers, prices them per block, persists the batch, and advances
/// the journal, so a restart at any point replays at most one page.
pub async fn run(syncer: Arc<Syncer>, mut progress: SyncProgress, token: CancellationToken) {
    info!(
        "Historical sync {}: blocks {}-{}, resuming after {}",
        progress.id, progress.start_block, progress.end_block, progress.last_processed_block
    );

    progress.status = SyncStatus::Running;
    progress.error_message = None;
    persist_progress(&syncer, &progress).await;

    let mut current = progress.last_processed_block + 1;

    while current <= progress.end_block {
        if token.is_cancelled() {
            pause(&syncer, &mut progress).await;
            return;
        }

        let transfers = tokio::select! {
            _ = token.cancelled() => {
                pause(&syncer, &mut progress).await;
                return;
            }
            result = syncer.etherscan.get_token_transfers(
                &syncer.config.pool_address,
                current,
                progress.end_block,
            ) => match result {
                Ok(transfers) => transfers,
                Err(e) => {
                    warn!(
                        "Historical sync {}: transfer fetch from block {} failed: {}",
                        progress.id, current, e
                    );
                    sleep(FETCH_COOLDOWN).await;
                    return;
                }
            }
        };

        if transfers.is_empty() {
            break;
        }

        let Some(last_block) = last_block_in_page(&transfers) else {
            warn!(
                "Historical sync {}: page from block {} had no parseable transfers",
                progress.id, current
            );
            sleep(FETCH_COOLDOWN).await;
            return;
        };

        // The page may truncate mid-block; unless this is the last iteration
        // the final block is refetched next time around. A page confined to a
        // single block can never grow, so it is taken as-is.
        let is_final = last_block == progress.end_block || last_block == current;

        let mut groups = filter_and_group(&transfers, is_final, last_block);
        let batch_size: usize = groups.iter().map(Vec::len).sum();
        info!(
            "Historical sync {}: pricing {} transactions covering blocks {}-{}",
            progress.id, batch_size, current, last_block
        );

        enrich_prices(
            &syncer.binance,
            &mut groups,
            syncer.config.price_fetch_batch_size,
        )
        .await;
        let batch: Vec<Transaction> = groups.into_iter().flatten().collect();

        if let Err(e) = db::transaction::save_transactions(&syncer.pool, &batch).await {
            error!("Historical sync {}: failed to save batch: {}", progress.id, e);
            progress.status = SyncStatus::Failed;
            progress.error_message = Some(format!("failed to save transactions: {}", e));
            persist_progress(&syncer, &progress).await;
            return;
        }

        progress.last_processed_block = if is_final { last_block } else { last_block - 1 };
        progress.transactions_processed += batch.len() as u64;
        persist_progress(&syncer, &progress).await;

        current = last_block;
        if is_final {
            break;
        }
    }

    progress.status = SyncStatus::Completed;
    progress.completed_at = Some(Utc::now());
    persist_progress(&syncer, &progress).await;
    info!(
        "Historical sync {} completed at block {} ({} transactions)",
        progress.id, progress.last_processed_block, progress.transactions_processed
    );
}

/// The highest block number the page mentions; transfers with a mangled block
/// number do not count.
fn last_block_in_page(transfers: &[TokenTransfer]) -> Option<u64> {
    transfers.iter().filter_map(|t| t.block_number().ok()).max()
}

/// Deduplicates a page by hash (first occurrence wins), defers the trailing
/// block of a non-final page, and groups the survivors per block so each
/// group shares one price lookup. Transfers with unparseable numeric fields
/// are dropped with a warning.
fn filter_and_group(
    transfers: &[TokenTransfer],
    is_final: bool,
    last_block: u64,
) -> Vec<Vec<Transaction>> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut groups: BTreeMap<u64, Vec<Transaction>> = BTreeMap::new();

    for transfer in transfers {
        if seen.contains(transfer.hash.as_str()) {
            continue;
        }

        let block_number = match transfer.block_number() {
            Ok(n) => n,
            Err(e) => {
                warn!("Skipping transfer {}: {}", transfer.hash, e);
                continue;
            }
        };

        if block_number == last_block && !is_final {
            continue;
        }

        let tx = match to_transaction(transfer, block_number) {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Skipping transfer {}: {}", transfer.hash, e);
                continue;
            }
        };

        seen.insert(transfer.hash.as_str());
        groups.entry(block_number).or_default().push(tx);
    }

    groups.into_values().collect()
}

fn to_transaction(
    transfer: &TokenTransfer,
    block_number: u64,
) -> Result<Transaction, crate::clients::ClientError> {
    Ok(Transaction::new_pending(
        transfer.hash.clone(),
        block_number,
        transfer.timestamp()?,
        transfer.gas_used()?,
        transfer.gas_price()?,
    ))
}

/// Prices block groups in chunks. Within a chunk every group fetches its
/// price concurrently (one call per block); the chunk joins before the next
/// one starts. A failed lookup fails only its own group.
async fn enrich_prices(binance: &BinanceClient, groups: &mut [Vec<Transaction>], chunk_size: usize) {
    for chunk in groups.chunks_mut(chunk_size.max(1)) {
        let fetches = chunk.iter_mut().map(|group| async move {
            let Some(first) = group.first() else {
                return;
            };
            let block_number = first.block_number;
            let block_time = first.timestamp;

            match binance.get_price(PRICE_SYMBOL, block_time).await {
                Ok(kline) => {
                    for tx in group.iter_mut() {
                        tx.update_prices(&kline.close);
                    }
                }
                Err(e) => {
                    warn!("Price fetch for block {} failed: {}", block_number, e);
                    for tx in group.iter_mut() {
                        tx.mark_price_failed();
                    }
                }
            }
        });

        future::join_all(fetches).await;
    }
}

async fn pause(syncer: &Syncer, progress: &mut SyncProgress) {
    progress.status = SyncStatus::Paused;
    progress.error_message = Some("cancelled".to_string());
    persist_progress(syncer, progress).await;
    info!(
        "Historical sync {} paused at block {}",
        progress.id, progress.last_processed_block
    );
}

async fn persist_progress(syncer: &Syncer, progress: &SyncProgress) {
    if let Err(e) = db::sync_progress::update_sync_progress(&syncer.pool, progress).await {
        error!("Failed to update sync progress {}: {}", progress.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TxStatus;
    use ethers::types::U256;

    fn transfer(hash: &str, block: u64) -> TokenTransfer {
        serde_json::from_value(serde_json::json!({
            "blockNumber": block.to_string(),
            "timeStamp": "1620250931",
            "hash": hash,
            "gasPrice": "50000000000",
            "gasUsed": "21000",
        }))
        .unwrap()
    }

    fn broken_transfer(hash: &str, block: &str) -> TokenTransfer {
        serde_json::from_value(serde_json::json!({
            "blockNumber": block,
            "timeStamp": "1620250931",
            "hash": hash,
            "gasPrice": "50000000000",
            "gasUsed": "21000",
        }))
        .unwrap()
    }

    fn flat_len(groups: &[Vec<Transaction>]) -> usize {
        groups.iter().map(Vec::len).sum()
    }

    #[test]
    fn groups_by_block_on_final_page() {
        let transfers = vec![
            transfer("tx1", 100),
            transfer("tx2", 100),
            transfer("tx3", 101),
        ];

        let groups = filter_and_group(&transfers, true, 101);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][0].block_number, 100);
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[1][0].block_number, 101);
        assert!(groups
            .iter()
            .flatten()
            .all(|tx| tx.status == TxStatus::PendingPrice));
    }

    #[test]
    fn duplicate_hashes_collapse_to_first() {
        let transfers = vec![
            transfer("tx1", 100),
            transfer("tx1", 100),
            transfer("tx2", 101),
        ];

        let groups = filter_and_group(&transfers, true, 101);

        assert_eq!(flat_len(&groups), 2);
        assert_eq!(groups[0].len(), 1);
    }

    #[test]
    fn defers_trailing_block_of_non_final_page() {
        let transfers = vec![
            transfer("tx1", 100),
            transfer("tx2", 101),
            transfer("tx3", 101),
        ];

        let groups = filter_and_group(&transfers, false, 101);

        // Block 101 is presumed truncated; it will be refetched.
        assert_eq!(flat_len(&groups), 1);
        assert_eq!(groups[0][0].block_number, 100);
    }

    #[test]
    fn final_page_keeps_trailing_block() {
        let transfers = vec![transfer("tx1", 100), transfer("tx2", 101)];

        let groups = filter_and_group(&transfers, true, 101);

        assert_eq!(flat_len(&groups), 2);
    }

    #[test]
    fn unparseable_transfers_are_skipped_not_fatal() {
        let transfers = vec![
            transfer("tx1", 100),
            broken_transfer("tx2", "not-a-number"),
            transfer("tx3", 101),
        ];

        let groups = filter_and_group(&transfers, true, 101);

        assert_eq!(flat_len(&groups), 2);
    }

    #[test]
    fn built_transactions_carry_transfer_values() {
        let transfers = vec![transfer("tx1", 100)];

        let groups = filter_and_group(&transfers, true, 100);

        let tx = &groups[0][0];
        assert_eq!(tx.tx_hash, "tx1");
        assert_eq!(tx.gas_used, U256::from(21_000u64));
        assert_eq!(tx.gas_price, U256::from(50_000_000_000u64));
        assert_eq!(tx.timestamp.timestamp(), 1620250931);
        assert!(tx.fee_eth.is_none());
    }

    #[test]
    fn last_block_ignores_mangled_entries() {
        let transfers = vec![
            transfer("tx1", 100),
            transfer("tx2", 105),
            broken_transfer("tx3", "xyz"),
        ];

        assert_eq!(last_block_in_page(&transfers), Some(105));
        assert_eq!(last_block_in_page(&[]), None);
        assert_eq!(
            last_block_in_page(&[broken_transfer("tx", "xyz")]),
            None
        );
    }

    #[test]
    fn single_block_page_is_forced_final() {
        // All transfers in the cursor block: deferring would loop forever, so
        // the driver forces is_final and the block is persisted.
        let transfers = vec![transfer("tx1", 100), transfer("tx2", 100)];
        let last_block = last_block_in_page(&transfers).unwrap();
        let current = 100u64;
        let end = 200u64;

        let is_final = last_block == end || last_block == current;
        assert!(is_final);

        let groups = filter_and_group(&transfers, is_final, last_block);
        assert_eq!(flat_len(&groups), 2);
    }
}

use crate::db;
use crate::models::SyncProgress;
use crate::syncer::{historical, live, SyncError, Syncer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Boots the ingestion pipeline: decides between catch-up and tail, resumes
/// any interrupted back-fill runs, and hands the head over to live mode.
/// Blocks until the token cancels (or a fatal startup error).
pub async fn start(syncer: Arc<Syncer>, token: CancellationToken) -> Result<(), SyncError> {
    let last_tracked = match db::block_tracker::get_last_tracked_block(&syncer.pool).await? {
        Some(block) => block,
        None => syncer.config.start_block.saturating_sub(1),
    };

    let head = syncer.node.latest_block_number().await?;
    if last_tracked > head {
        return Err(SyncError::TrackerAheadOfChain {
            last: last_tracked,
            head,
        });
    }

    if syncer.config.disable_historical_sync {
        info!("Historical sync disabled");
    } else {
        if last_tracked < head {
            info!(
                "Starting historical sync from block {} to {}",
                last_tracked + 1,
                head
            );
            db::sync_progress::create_sync_progress(&syncer.pool, last_tracked + 1, head).await?;
            // Freeze the hand-off point: everything past `head` belongs to
            // live mode from here on.
            db::block_tracker::update_last_tracked_block(&syncer.pool, head).await?;
        }

        let incomplete = db::sync_progress::get_incomplete_sync_progress(&syncer.pool).await?;
        for progress in incomplete {
            spawn_historical_run(syncer.clone(), progress, token.clone());
        }
    }

    info!("Starting live sync from block {}", head);
    live::run(syncer, head, token).await;
    Ok(())
}

/// Runs a back-fill in its own task. A panic inside the run is caught at the
/// join point and recorded on the journal so the process keeps serving.
fn spawn_historical_run(syncer: Arc<Syncer>, progress: SyncProgress, token: CancellationToken) {
    let pool = syncer.pool.clone();
    let progress_id = progress.id;

    let handle = tokio::spawn(historical::run(syncer, progress, token));

    tokio::spawn(async move {
        if let Err(join_err) = handle.await {
            if join_err.is_panic() {
                error!("Historical sync {} panicked: {}", progress_id, join_err);
                let message = format!("panic: {}", join_err);
                if let Err(e) =
                    db::sync_progress::mark_sync_progress_failed(&pool, progress_id, &message).await
                {
                    error!(
                        "Failed to record panic for historical sync {}: {}",
                        progress_id, e
                    );
                }
            }
        }
    });
}

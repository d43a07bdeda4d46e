use crate::models::{SyncProgress, SyncStatus};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Creates a RUNNING journal entry for a back-fill over `[start_block,
/// end_block]`. `last_processed_block` starts one below `start_block` so the
/// uniform resume rule (`cursor = last_processed_block + 1`) begins exactly at
/// `start_block`.
pub async fn create_sync_progress(
    pool: &PgPool,
    start_block: u64,
    end_block: u64,
) -> Result<SyncProgress, sqlx::Error> {
    let last_processed = start_block.saturating_sub(1);

    let row = sqlx::query(
        "INSERT INTO sync_progress \
         (start_block, end_block, last_processed_block, transactions_processed, status) \
         VALUES ($1, $2, $3, 0, $4) \
         RETURNING id, created_at",
    )
    .bind(start_block as i64)
    .bind(end_block as i64)
    .bind(last_processed as i64)
    .bind(SyncStatus::Running.as_str())
    .fetch_one(pool)
    .await?;

    Ok(SyncProgress {
        id: row.try_get("id")?,
        start_block,
        end_block,
        last_processed_block: last_processed,
        transactions_processed: 0,
        status: SyncStatus::Running,
        error_message: None,
        completed_at: None,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn update_sync_progress(pool: &PgPool, progress: &SyncProgress) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sync_progress SET \
         last_processed_block = $2, \
         transactions_processed = $3, \
         status = $4, \
         error_message = $5, \
         completed_at = $6 \
         WHERE id = $1",
    )
    .bind(progress.id)
    .bind(progress.last_processed_block as i64)
    .bind(progress.transactions_processed as i64)
    .bind(progress.status.as_str())
    .bind(&progress.error_message)
    .bind(progress.completed_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Runs that still need driving after a restart, newest first.
pub async fn get_incomplete_sync_progress(pool: &PgPool) -> Result<Vec<SyncProgress>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, start_block, end_block, last_processed_block, \
                transactions_processed, status, error_message, completed_at, created_at \
         FROM sync_progress WHERE status != $1 ORDER BY created_at DESC",
    )
    .bind(SyncStatus::Completed.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(sync_progress_from_row).collect()
}

/// Targeted failure write used when a run's task dies without a chance to
/// persist its own state (e.g. a panic).
pub async fn mark_sync_progress_failed(
    pool: &PgPool,
    id: i64,
    error_message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sync_progress SET status = $2, error_message = $3 WHERE id = $1")
        .bind(id)
        .bind(SyncStatus::Failed.as_str())
        .bind(error_message)
        .execute(pool)
        .await?;
    Ok(())
}

fn sync_progress_from_row(row: &PgRow) -> Result<SyncProgress, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let start_block: i64 = row.try_get("start_block")?;
    let end_block: i64 = row.try_get("end_block")?;
    let last_processed_block: i64 = row.try_get("last_processed_block")?;
    let transactions_processed: i64 = row.try_get("transactions_processed")?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;

    Ok(SyncProgress {
        id: row.try_get("id")?,
        start_block: start_block as u64,
        end_block: end_block as u64,
        last_processed_block: last_processed_block as u64,
        transactions_processed: transactions_processed as u64,
        status: status.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(e),
        })?,
        error_message: row.try_get("error_message")?,
        completed_at,
        created_at: row.try_get("created_at")?,
    })
}

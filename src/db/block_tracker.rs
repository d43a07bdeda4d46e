use sqlx::{PgPool, Row};

const TRACKER_ROW_ID: i16 = 1;

/// Advances the live-mode cursor. Callers only invoke this after every swap in
/// the block has been durably stored.
pub async fn update_last_tracked_block(pool: &PgPool, block_number: u64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO block_tracker (id, block_number, updated_at) \
         VALUES ($1, $2, NOW()) \
         ON CONFLICT (id) DO UPDATE SET \
         block_number = EXCLUDED.block_number, updated_at = NOW()",
    )
    .bind(TRACKER_ROW_ID)
    .bind(block_number as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_last_tracked_block(pool: &PgPool) -> Result<Option<u64>, sqlx::Error> {
    let row = sqlx::query("SELECT block_number FROM block_tracker WHERE id = $1")
        .bind(TRACKER_ROW_ID)
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.try_get::<i64, _>("block_number").map(|n| n as u64))
        .transpose()
}

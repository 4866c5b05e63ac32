use sqlx::SqliteConnection;

use crate::db_types::{ShopSyncRecord, SyncRecordStatus, SyncType};

/// A shop is paused after this many failures in a row.
pub const MAX_CONSECUTIVE_FAILURES: i64 = 10;

pub async fn fetch_or_create(
    shop_id: i64,
    sync_type: SyncType,
    conn: &mut SqliteConnection,
) -> Result<ShopSyncRecord, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO shop_sync_records (shop_id, sync_type) VALUES ($1, $2)")
        .bind(shop_id)
        .bind(sync_type)
        .execute(&mut *conn)
        .await?;
    let record = sqlx::query_as("SELECT * FROM shop_sync_records WHERE shop_id = $1 AND sync_type = $2")
        .bind(shop_id)
        .bind(sync_type)
        .fetch_one(conn)
        .await?;
    Ok(record)
}

/// Advances the watermark and clears the failure counter. The watermark never moves backwards.
pub async fn record_success(
    shop_id: i64,
    sync_type: SyncType,
    last_sync_time: i64,
    last_transaction_id: i64,
    synced: i64,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            UPDATE shop_sync_records SET
                last_sync_time = MAX(last_sync_time, $1),
                last_transaction_id = CASE WHEN $1 >= last_sync_time THEN $2 ELSE last_transaction_id END,
                consecutive_fail_count = 0,
                last_error = '',
                total_synced = total_synced + $3,
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $4 AND sync_type = $5
        "#,
    )
    .bind(last_sync_time)
    .bind(last_transaction_id)
    .bind(synced)
    .bind(shop_id)
    .bind(sync_type)
    .execute(conn)
    .await?;
    Ok(())
}

/// Bumps the failure counter, pausing the record when it reaches [`MAX_CONSECUTIVE_FAILURES`]. Returns the updated
/// record.
pub async fn record_failure(
    shop_id: i64,
    sync_type: SyncType,
    error: &str,
    conn: &mut SqliteConnection,
) -> Result<ShopSyncRecord, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
            UPDATE shop_sync_records SET
                consecutive_fail_count = consecutive_fail_count + 1,
                last_error = $1,
                status = CASE WHEN status = $6 AND consecutive_fail_count + 1 >= $2 THEN $3 ELSE status END,
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $4 AND sync_type = $5
            RETURNING *;
        "#,
    )
    .bind(error)
    .bind(MAX_CONSECUTIVE_FAILURES)
    .bind(SyncRecordStatus::Paused)
    .bind(shop_id)
    .bind(sync_type)
    .bind(SyncRecordStatus::Enabled)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

pub async fn set_status(
    shop_id: i64,
    sync_type: SyncType,
    status: SyncRecordStatus,
    error: &str,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE shop_sync_records SET status = $1, last_error = $2, consecutive_fail_count = CASE WHEN $1 = $3 THEN \
         0 ELSE consecutive_fail_count END, updated_at = CURRENT_TIMESTAMP WHERE shop_id = $4 AND sync_type = $5",
    )
    .bind(status)
    .bind(error)
    .bind(SyncRecordStatus::Enabled)
    .bind(shop_id)
    .bind(sync_type)
    .execute(conn)
    .await?;
    Ok(())
}

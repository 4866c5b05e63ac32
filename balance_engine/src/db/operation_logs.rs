use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOperationLog, OperationLog},
    shard::ShardedTable,
};

pub async fn insert_log(log: &NewOperationLog, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} (shop_id, order_sn, operator_id, action, detail) VALUES ($1, $2, $3, $4, $5)",
        ShardedTable::OperationLogs.for_key(log.shop_id)
    );
    sqlx::query(&sql)
        .bind(log.shop_id)
        .bind(&log.order_sn)
        .bind(log.operator_id)
        .bind(&log.action)
        .bind(&log.detail)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_logs_for_order(
    shop_id: i64,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<OperationLog>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2 ORDER BY id",
        ShardedTable::OperationLogs.for_key(shop_id)
    );
    let rows = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_all(conn).await?;
    Ok(rows)
}

/// Copies up to `batch` live rows older than `days` into the archive shard and deletes them. Returns the number of
/// rows moved; zero means the shard is done.
pub async fn archive_batch(shard: i64, days: i64, batch: i64, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let live = ShardedTable::OperationLogs.table(shard);
    let archive = ShardedTable::OperationLogsArchive.table(shard);
    let cutoff = format!("-{days} days");
    let ids: Vec<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM {live} WHERE created_at < datetime('now', $1) ORDER BY id LIMIT $2"
    ))
    .bind(&cutoff)
    .bind(batch)
    .fetch_all(&mut *conn)
    .await?;
    let (Some(first), Some(last)) = (ids.first(), ids.last()) else {
        return Ok(0);
    };
    sqlx::query(&format!(
        "INSERT OR IGNORE INTO {archive} SELECT * FROM {live} WHERE id BETWEEN $1 AND $2 AND created_at < \
         datetime('now', $3)"
    ))
    .bind(first)
    .bind(last)
    .bind(&cutoff)
    .execute(&mut *conn)
    .await?;
    let deleted = sqlx::query(&format!(
        "DELETE FROM {live} WHERE id BETWEEN $1 AND $2 AND created_at < datetime('now', $3)"
    ))
    .bind(first)
    .bind(last)
    .bind(&cutoff)
    .execute(conn)
    .await?;
    Ok(deleted.rows_affected())
}

/// Deletes archive rows older than `days`.
pub async fn purge_archive(shard: i64, days: i64, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "DELETE FROM {} WHERE created_at < datetime('now', $1)",
        ShardedTable::OperationLogsArchive.table(shard)
    );
    let result = sqlx::query(&sql).bind(format!("-{days} days")).execute(conn).await?;
    Ok(result.rows_affected())
}

pub async fn count_rows(table: ShardedTable, shard: i64, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.table(shard))).fetch_one(conn).await?;
    Ok(count)
}

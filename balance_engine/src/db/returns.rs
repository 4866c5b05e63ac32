use balance_common::Money;
use sqlx::SqliteConnection;

use crate::{
    db_types::{RefundStatus, ReturnRecord, ReturnSnapshot},
    shard::ShardedTable,
};

fn table(shop_id: i64) -> String {
    ShardedTable::Returns.for_key(shop_id)
}

pub async fn fetch_return(
    shop_id: i64,
    return_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<ReturnRecord>, sqlx::Error> {
    let sql = format!("SELECT * FROM {} WHERE shop_id = $1 AND return_sn = $2", table(shop_id));
    let record = sqlx::query_as(&sql).bind(shop_id).bind(return_sn).fetch_optional(conn).await?;
    Ok(record)
}

pub async fn fetch_returns_for_order(
    shop_id: i64,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<ReturnRecord>, sqlx::Error> {
    let sql = format!("SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2 ORDER BY id", table(shop_id));
    let records = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_all(conn).await?;
    Ok(records)
}

/// Local marketplace status for each return number of the shop that we know about.
pub async fn fetch_statuses(
    shop_id: i64,
    conn: &mut SqliteConnection,
) -> Result<std::collections::HashMap<String, String>, sqlx::Error> {
    let sql = format!("SELECT return_sn, status FROM {} WHERE shop_id = $1", table(shop_id));
    let rows: Vec<(String, String)> = sqlx::query_as(&sql).bind(shop_id).fetch_all(conn).await?;
    Ok(rows.into_iter().collect())
}

pub async fn lock_return(shop_id: i64, return_sn: &str, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let sql = format!("UPDATE {} SET id = id WHERE shop_id = $1 AND return_sn = $2", table(shop_id));
    let result = sqlx::query(&sql).bind(shop_id).bind(return_sn).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_return(
    r: &ReturnSnapshot,
    refund_status: RefundStatus,
    conn: &mut SqliteConnection,
) -> Result<ReturnRecord, sqlx::Error> {
    let sql = format!(
        r#"
            INSERT INTO {} (
                shop_id, return_sn, order_sn, refund_amount, amount_before_discount, currency, status, reason,
                text_reason, buyer_username, tracking_number, needs_logistics, logistics_status, due_date,
                create_time, update_time, refund_status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *;
        "#,
        table(r.shop_id)
    );
    let record = sqlx::query_as(&sql)
        .bind(r.shop_id)
        .bind(&r.return_sn)
        .bind(&r.order_sn)
        .bind(r.refund_amount)
        .bind(r.amount_before_discount)
        .bind(&r.currency)
        .bind(&r.status)
        .bind(&r.reason)
        .bind(&r.text_reason)
        .bind(&r.buyer_username)
        .bind(&r.tracking_number)
        .bind(r.needs_logistics)
        .bind(&r.logistics_status)
        .bind(r.due_date)
        .bind(r.create_time)
        .bind(r.update_time)
        .bind(refund_status)
        .fetch_one(conn)
        .await?;
    Ok(record)
}

/// Refreshes the marketplace fields and sets the refund status.
pub async fn update_return(
    r: &ReturnSnapshot,
    refund_status: RefundStatus,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
            UPDATE {} SET
                order_sn = $1,
                refund_amount = $2,
                amount_before_discount = $3,
                currency = $4,
                status = $5,
                reason = $6,
                text_reason = $7,
                buyer_username = $8,
                tracking_number = $9,
                needs_logistics = $10,
                logistics_status = $11,
                due_date = $12,
                update_time = $13,
                refund_status = $14,
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $15 AND return_sn = $16
        "#,
        table(r.shop_id)
    );
    sqlx::query(&sql)
        .bind(&r.order_sn)
        .bind(r.refund_amount)
        .bind(r.amount_before_discount)
        .bind(&r.currency)
        .bind(&r.status)
        .bind(&r.reason)
        .bind(&r.text_reason)
        .bind(&r.buyer_username)
        .bind(&r.tracking_number)
        .bind(r.needs_logistics)
        .bind(&r.logistics_status)
        .bind(r.due_date)
        .bind(r.update_time)
        .bind(refund_status)
        .bind(r.shop_id)
        .bind(&r.return_sn)
        .execute(conn)
        .await?;
    Ok(())
}

/// Moves the refund status from `from` to `to`. The guard makes the transition a compare-and-swap; returns false
/// if the row was not in `from`.
pub async fn transition_refund_status(
    shop_id: i64,
    return_sn: &str,
    from: RefundStatus,
    to: RefundStatus,
    unfrozen: Money,
    error: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        r#"
            UPDATE {} SET
                refund_status = $1,
                unfrozen_amount = $2,
                refund_error = $3,
                processed_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $4 AND return_sn = $5 AND refund_status = $6
        "#,
        table(shop_id)
    );
    let result = sqlx::query(&sql)
        .bind(to)
        .bind(unfrozen)
        .bind(error)
        .bind(shop_id)
        .bind(return_sn)
        .bind(from)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

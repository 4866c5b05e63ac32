use balance_common::Money;
use sqlx::SqliteConnection;

use crate::{
    db_types::{OrderShipmentRecord, ShipmentStatus},
    shard::ShardedTable,
};

fn table(shop_id: i64) -> String {
    ShardedTable::OrderShipmentRecords.for_key(shop_id)
}

#[derive(Debug, Clone)]
pub struct NewShipmentRecord {
    pub shop_id: i64,
    pub order_sn: String,
    pub operator_id: i64,
    pub shop_owner_id: i64,
    pub goods_cost: Money,
    pub shipping_cost: Money,
    pub frozen_amount: Money,
    pub freeze_transaction_no: String,
    pub ship_method: String,
}

pub async fn fetch_record(
    shop_id: i64,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderShipmentRecord>, sqlx::Error> {
    let sql = format!("SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2", table(shop_id));
    let record = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_optional(conn).await?;
    Ok(record)
}

pub async fn lock_record(shop_id: i64, order_sn: &str, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let sql = format!("UPDATE {} SET id = id WHERE shop_id = $1 AND order_sn = $2", table(shop_id));
    let result = sqlx::query(&sql).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

/// Creates the record in the Shipped state, replacing a previous Failed or Cancelled attempt for the same order.
pub async fn insert_shipped(
    record: &NewShipmentRecord,
    conn: &mut SqliteConnection,
) -> Result<OrderShipmentRecord, sqlx::Error> {
    let sql = format!(
        r#"
            INSERT INTO {} (
                shop_id, order_sn, operator_id, shop_owner_id, goods_cost, shipping_cost, total_cost, frozen_amount,
                freeze_transaction_no, ship_method, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (shop_id, order_sn) DO UPDATE SET
                operator_id = excluded.operator_id,
                shop_owner_id = excluded.shop_owner_id,
                goods_cost = excluded.goods_cost,
                shipping_cost = excluded.shipping_cost,
                total_cost = excluded.total_cost,
                frozen_amount = excluded.frozen_amount,
                freeze_transaction_no = excluded.freeze_transaction_no,
                ship_method = excluded.ship_method,
                status = excluded.status,
                settlement_id = NULL,
                failure_reason = '',
                updated_at = CURRENT_TIMESTAMP
            RETURNING *;
        "#,
        table(record.shop_id)
    );
    let row = sqlx::query_as(&sql)
        .bind(record.shop_id)
        .bind(&record.order_sn)
        .bind(record.operator_id)
        .bind(record.shop_owner_id)
        .bind(record.goods_cost)
        .bind(record.shipping_cost)
        .bind(record.goods_cost + record.shipping_cost)
        .bind(record.frozen_amount)
        .bind(&record.freeze_transaction_no)
        .bind(&record.ship_method)
        .bind(ShipmentStatus::Shipped)
        .fetch_one(conn)
        .await?;
    Ok(row)
}

pub async fn set_status(
    shop_id: i64,
    order_sn: &str,
    status: ShipmentStatus,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET status = $1, failure_reason = $2, updated_at = CURRENT_TIMESTAMP WHERE shop_id = $3 AND \
         order_sn = $4",
        table(shop_id)
    );
    let result = sqlx::query(&sql).bind(status).bind(reason).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_completed(
    shop_id: i64,
    order_sn: &str,
    settlement_id: i64,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET status = $1, settlement_id = $2, updated_at = CURRENT_TIMESTAMP WHERE shop_id = $3 AND \
         order_sn = $4 AND status = $5",
        table(shop_id)
    );
    let result = sqlx::query(&sql)
        .bind(ShipmentStatus::Completed)
        .bind(settlement_id)
        .bind(shop_id)
        .bind(order_sn)
        .bind(ShipmentStatus::Shipped)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Shipped records in one shard that have not been settled yet.
pub async fn fetch_unsettled(shard: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderShipmentRecord>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE status = $1 AND settlement_id IS NULL ORDER BY id",
        ShardedTable::OrderShipmentRecords.table(shard)
    );
    let records = sqlx::query_as(&sql).bind(ShipmentStatus::Shipped).fetch_all(conn).await?;
    Ok(records)
}

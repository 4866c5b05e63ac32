use balance_common::Money;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{EscrowSyncStatus, FeeBreakdown, OrderEscrow},
    shard::ShardedTable,
};

/// One line of the marketplace's escrow breakdown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEscrowItem {
    pub item_id: i64,
    pub item_name: String,
    pub model_id: i64,
    pub quantity: i64,
    pub original_price: Money,
    pub discounted_price: Money,
}

pub async fn fetch_escrow(
    shop_id: i64,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderEscrow>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2",
        ShardedTable::OrderEscrows.for_key(shop_id)
    );
    let escrow = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_optional(conn).await?;
    Ok(escrow)
}

/// Records the outcome of an escrow-detail fetch. A failed fetch keeps the amounts of an earlier successful one.
pub async fn upsert_escrow(
    shop_id: i64,
    order_sn: &str,
    fees: &FeeBreakdown,
    status: EscrowSyncStatus,
    error: &str,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
            INSERT INTO {} (
                shop_id, order_sn, escrow_amount, buyer_total_amount, original_price, commission_fee, service_fee,
                seller_transaction_fee, final_shipping_fee, actual_shipping_fee, original_cost_of_goods_sold,
                sync_status, sync_error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (shop_id, order_sn) DO UPDATE SET
                escrow_amount = CASE WHEN $12 = 1 THEN excluded.escrow_amount ELSE escrow_amount END,
                buyer_total_amount = CASE WHEN $12 = 1 THEN excluded.buyer_total_amount ELSE buyer_total_amount END,
                original_price = CASE WHEN $12 = 1 THEN excluded.original_price ELSE original_price END,
                commission_fee = CASE WHEN $12 = 1 THEN excluded.commission_fee ELSE commission_fee END,
                service_fee = CASE WHEN $12 = 1 THEN excluded.service_fee ELSE service_fee END,
                seller_transaction_fee = CASE WHEN $12 = 1 THEN excluded.seller_transaction_fee
                    ELSE seller_transaction_fee END,
                final_shipping_fee = CASE WHEN $12 = 1 THEN excluded.final_shipping_fee ELSE final_shipping_fee END,
                actual_shipping_fee = CASE WHEN $12 = 1 THEN excluded.actual_shipping_fee ELSE actual_shipping_fee END,
                original_cost_of_goods_sold = CASE WHEN $12 = 1 THEN excluded.original_cost_of_goods_sold
                    ELSE original_cost_of_goods_sold END,
                sync_status = excluded.sync_status,
                sync_error = excluded.sync_error,
                updated_at = CURRENT_TIMESTAMP
        "#,
        ShardedTable::OrderEscrows.for_key(shop_id)
    );
    sqlx::query(&sql)
        .bind(shop_id)
        .bind(order_sn)
        .bind(fees.escrow_amount)
        .bind(fees.buyer_total_amount)
        .bind(fees.original_price)
        .bind(fees.commission_fee)
        .bind(fees.service_fee)
        .bind(fees.seller_transaction_fee)
        .bind(fees.final_shipping_fee)
        .bind(fees.actual_shipping_fee)
        .bind(fees.original_cost_of_goods_sold)
        .bind(status)
        .bind(error)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn replace_escrow_items(
    shop_id: i64,
    order_sn: &str,
    items: &[NewEscrowItem],
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let table = ShardedTable::OrderEscrowItems.for_key(shop_id);
    let sql = format!("DELETE FROM {table} WHERE shop_id = $1 AND order_sn = $2");
    sqlx::query(&sql).bind(shop_id).bind(order_sn).execute(&mut *conn).await?;
    if items.is_empty() {
        return Ok(());
    }
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "INSERT INTO {table} (shop_id, order_sn, item_id, item_name, model_id, quantity, original_price, \
         discounted_price) "
    ));
    builder.push_values(items, |mut b, item| {
        b.push_bind(shop_id)
            .push_bind(order_sn)
            .push_bind(item.item_id)
            .push_bind(&item.item_name)
            .push_bind(item.model_id)
            .push_bind(item.quantity)
            .push_bind(item.original_price)
            .push_bind(item.discounted_price);
    });
    builder.build().execute(conn).await?;
    Ok(())
}

pub async fn count_escrow_items(shop_id: i64, order_sn: &str, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE shop_id = $1 AND order_sn = $2",
        ShardedTable::OrderEscrowItems.for_key(shop_id)
    );
    let count: i64 = sqlx::query_scalar(&sql).bind(shop_id).bind(order_sn).fetch_one(conn).await?;
    Ok(count)
}

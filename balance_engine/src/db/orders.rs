use std::collections::HashMap;

use balance_common::Money;
use log::*;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{FeeBreakdown, NewOrderItem, Order, OrderAddress, OrderItem, OrderSnapshot, PrepaymentStatus, Shipment},
    shard::{orders_table, ShardedTable},
};

pub async fn fetch_order(shop_id: i64, order_sn: &str, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let sql = format!("SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2", orders_table(shop_id));
    let order = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_optional(conn).await?;
    Ok(order)
}

/// Takes the row lock on an order. Returns false if the order does not exist.
pub async fn lock_order(shop_id: i64, order_sn: &str, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let sql = format!("UPDATE {} SET id = id WHERE shop_id = $1 AND order_sn = $2", orders_table(shop_id));
    let result = sqlx::query(&sql).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

/// Inserts the order, or overwrites every marketplace-sourced column (status included) of the existing row.
/// Locally owned columns (prepayment, fees, the status lock) are left alone.
pub async fn upsert_order(snapshot: &OrderSnapshot, conn: &mut SqliteConnection) -> Result<Order, sqlx::Error> {
    let sql = format!(
        r#"
            INSERT INTO {} (
                shop_id, order_sn, region, currency, cod, total_amount, order_status, shipping_carrier,
                payment_method, tracking_number, buyer_user_id, buyer_username, create_time, update_time, pay_time,
                ship_by_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (shop_id, order_sn) DO UPDATE SET
                region = excluded.region,
                currency = excluded.currency,
                cod = excluded.cod,
                total_amount = excluded.total_amount,
                order_status = excluded.order_status,
                shipping_carrier = excluded.shipping_carrier,
                payment_method = excluded.payment_method,
                tracking_number = CASE WHEN excluded.tracking_number = '' THEN tracking_number
                    ELSE excluded.tracking_number END,
                buyer_user_id = excluded.buyer_user_id,
                buyer_username = excluded.buyer_username,
                create_time = excluded.create_time,
                update_time = excluded.update_time,
                pay_time = excluded.pay_time,
                ship_by_date = excluded.ship_by_date,
                updated_at = CURRENT_TIMESTAMP
            RETURNING *;
        "#,
        orders_table(snapshot.shop_id)
    );
    let order = sqlx::query_as(&sql)
        .bind(snapshot.shop_id)
        .bind(&snapshot.order_sn)
        .bind(&snapshot.region)
        .bind(&snapshot.currency)
        .bind(snapshot.cod)
        .bind(snapshot.total_amount)
        .bind(&snapshot.order_status)
        .bind(&snapshot.shipping_carrier)
        .bind(&snapshot.payment_method)
        .bind(&snapshot.tracking_number)
        .bind(snapshot.buyer_user_id)
        .bind(&snapshot.buyer_username)
        .bind(snapshot.create_time)
        .bind(snapshot.update_time)
        .bind(snapshot.pay_time)
        .bind(snapshot.ship_by_date)
        .fetch_one(conn)
        .await?;
    Ok(order)
}

/// Refreshes everything except `order_status`. Returns false if the order does not exist.
pub async fn update_non_status(snapshot: &OrderSnapshot, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let sql = format!(
        r#"
            UPDATE {} SET
                shipping_carrier = $1,
                tracking_number = CASE WHEN $2 = '' THEN tracking_number ELSE $2 END,
                ship_by_date = $3,
                update_time = MAX(update_time, $4),
                buyer_username = $5,
                payment_method = $6,
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $7 AND order_sn = $8
        "#,
        orders_table(snapshot.shop_id)
    );
    let result = sqlx::query(&sql)
        .bind(&snapshot.shipping_carrier)
        .bind(&snapshot.tracking_number)
        .bind(snapshot.ship_by_date)
        .bind(snapshot.update_time)
        .bind(&snapshot.buyer_username)
        .bind(&snapshot.payment_method)
        .bind(snapshot.shop_id)
        .bind(&snapshot.order_sn)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Deletes and re-inserts the order's line items.
pub async fn replace_items(
    shop_id: i64,
    order_sn: &str,
    items: &[NewOrderItem],
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let table = ShardedTable::OrderItems.for_key(shop_id);
    let sql = format!("DELETE FROM {table} WHERE shop_id = $1 AND order_sn = $2");
    sqlx::query(&sql).bind(shop_id).bind(order_sn).execute(&mut *conn).await?;
    if items.is_empty() {
        return Ok(());
    }
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "INSERT INTO {table} (shop_id, order_sn, item_id, item_name, item_sku, model_id, model_name, model_sku, \
         quantity, item_price, prepayment_share) "
    ));
    builder.push_values(items, |mut b, item| {
        b.push_bind(shop_id)
            .push_bind(order_sn)
            .push_bind(item.item_id)
            .push_bind(&item.item_name)
            .push_bind(&item.item_sku)
            .push_bind(item.model_id)
            .push_bind(&item.model_name)
            .push_bind(&item.model_sku)
            .push_bind(item.quantity)
            .push_bind(item.item_price)
            .push_bind(item.prepayment_share);
    });
    builder.build().execute(conn).await?;
    Ok(())
}

pub async fn fetch_items(shop_id: i64, order_sn: &str, conn: &mut SqliteConnection) -> Result<Vec<OrderItem>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2 ORDER BY id",
        ShardedTable::OrderItems.for_key(shop_id)
    );
    let items = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_all(conn).await?;
    Ok(items)
}

pub async fn set_item_share(id: i64, shop_id: i64, share: Money, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let sql = format!("UPDATE {} SET prepayment_share = $1 WHERE id = $2", ShardedTable::OrderItems.for_key(shop_id));
    sqlx::query(&sql).bind(share).bind(id).execute(conn).await?;
    Ok(())
}

/// Deletes and re-inserts the recipient address.
pub async fn replace_address(
    shop_id: i64,
    order_sn: &str,
    address: &OrderAddress,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let table = ShardedTable::OrderAddresses.for_key(shop_id);
    let sql = format!("DELETE FROM {table} WHERE shop_id = $1 AND order_sn = $2");
    sqlx::query(&sql).bind(shop_id).bind(order_sn).execute(&mut *conn).await?;
    let sql = format!(
        "INSERT INTO {table} (shop_id, order_sn, name, phone, town, district, city, state, region, zipcode, \
         full_address) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    );
    sqlx::query(&sql)
        .bind(shop_id)
        .bind(order_sn)
        .bind(&address.name)
        .bind(&address.phone)
        .bind(&address.town)
        .bind(&address.district)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.region)
        .bind(&address.zipcode)
        .bind(&address.full_address)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_address(
    shop_id: i64,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderAddress>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2",
        ShardedTable::OrderAddresses.for_key(shop_id)
    );
    let address = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_optional(conn).await?;
    Ok(address)
}

pub async fn upsert_packages(packages: &[Shipment], conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for p in packages {
        let sql = format!(
            r#"
                INSERT INTO {} (shop_id, order_sn, package_number, tracking_number, shipping_carrier, logistics_status)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (shop_id, order_sn, package_number) DO UPDATE SET
                    tracking_number = CASE WHEN excluded.tracking_number = '' THEN tracking_number
                        ELSE excluded.tracking_number END,
                    shipping_carrier = excluded.shipping_carrier,
                    logistics_status = excluded.logistics_status,
                    updated_at = CURRENT_TIMESTAMP
            "#,
            ShardedTable::Shipments.for_key(p.shop_id)
        );
        sqlx::query(&sql)
            .bind(p.shop_id)
            .bind(&p.order_sn)
            .bind(&p.package_number)
            .bind(&p.tracking_number)
            .bind(&p.shipping_carrier)
            .bind(&p.logistics_status)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn fetch_packages(shop_id: i64, order_sn: &str, conn: &mut SqliteConnection) -> Result<Vec<Shipment>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2 ORDER BY package_number",
        ShardedTable::Shipments.for_key(shop_id)
    );
    let packages = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_all(conn).await?;
    Ok(packages)
}

/// Overwrites the status. When `locked` is given the status lock is set to that value too.
pub async fn set_status(
    shop_id: i64,
    order_sn: &str,
    status: &str,
    remark: &str,
    locked: Option<bool>,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        r#"
            UPDATE {} SET
                order_status = $1,
                status_remark = $2,
                status_locked = COALESCE($3, status_locked),
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $4 AND order_sn = $5
        "#,
        orders_table(shop_id)
    );
    let result =
        sqlx::query(&sql).bind(status).bind(remark).bind(locked).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_status_locked(
    shop_id: i64,
    order_sn: &str,
    locked: bool,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET status_locked = $1, updated_at = CURRENT_TIMESTAMP WHERE shop_id = $2 AND order_sn = $3",
        orders_table(shop_id)
    );
    let result = sqlx::query(&sql).bind(locked).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_tracking_number(
    shop_id: i64,
    order_sn: &str,
    tracking_number: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET tracking_number = $1, updated_at = CURRENT_TIMESTAMP WHERE shop_id = $2 AND order_sn = $3",
        orders_table(shop_id)
    );
    let result = sqlx::query(&sql).bind(tracking_number).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

/// Copies a tracking number onto every package of the order.
pub async fn set_package_tracking(
    shop_id: i64,
    order_sn: &str,
    tracking_number: &str,
    conn: &mut SqliteConnection,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET tracking_number = $1, updated_at = CURRENT_TIMESTAMP WHERE shop_id = $2 AND order_sn = $3",
        ShardedTable::Shipments.for_key(shop_id)
    );
    let result = sqlx::query(&sql).bind(tracking_number).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(result.rows_affected())
}

/// Stores the fee breakdown and the amount to reserve from prepayment.
pub async fn update_fee_breakdown(
    shop_id: i64,
    order_sn: &str,
    fees: &FeeBreakdown,
    prepayment_amount: Money,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
            UPDATE {} SET
                escrow_amount = $1,
                commission_fee = $2,
                service_fee = $3,
                seller_transaction_fee = $4,
                buyer_paid_shipping_fee = $5,
                actual_shipping_fee = $6,
                credit_card_transaction_fee = $7,
                prepayment_amount = $8,
                fee_synced_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $9 AND order_sn = $10
        "#,
        orders_table(shop_id)
    );
    sqlx::query(&sql)
        .bind(fees.escrow_amount)
        .bind(fees.commission_fee)
        .bind(fees.service_fee)
        .bind(fees.seller_transaction_fee)
        .bind(fees.buyer_paid_shipping_fee)
        .bind(fees.actual_shipping_fee)
        .bind(fees.credit_card_transaction_fee)
        .bind(prepayment_amount)
        .bind(shop_id)
        .bind(order_sn)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_prepayment_amount(
    shop_id: i64,
    order_sn: &str,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET prepayment_amount = $1, updated_at = CURRENT_TIMESTAMP WHERE shop_id = $2 AND order_sn = $3",
        orders_table(shop_id)
    );
    sqlx::query(&sql).bind(amount).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(())
}

/// Records the outcome of a prepayment check.
pub async fn mark_prepayment(
    shop_id: i64,
    order_sn: &str,
    status: PrepaymentStatus,
    snapshot: Money,
    frozen_amount: Money,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
            UPDATE {} SET
                prepayment_status = $1,
                prepayment_snapshot = $2,
                frozen_amount = $3,
                prepayment_checked_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $4 AND order_sn = $5
        "#,
        orders_table(shop_id)
    );
    sqlx::query(&sql).bind(status).bind(snapshot).bind(frozen_amount).bind(shop_id).bind(order_sn).execute(conn).await?;
    debug!("🗃️ Order {order_sn} prepayment marked {status}");
    Ok(())
}

/// Sets the prepayment still held for the order, and optionally resets the status to Unchecked.
pub async fn set_frozen(
    shop_id: i64,
    order_sn: &str,
    frozen_amount: Money,
    reset_status: bool,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
            UPDATE {} SET
                frozen_amount = $1,
                prepayment_status = CASE WHEN $2 THEN 0 ELSE prepayment_status END,
                updated_at = CURRENT_TIMESTAMP
            WHERE shop_id = $3 AND order_sn = $4
        "#,
        orders_table(shop_id)
    );
    sqlx::query(&sql).bind(frozen_amount).bind(reset_status).bind(shop_id).bind(order_sn).execute(conn).await?;
    Ok(())
}

/// READY_TO_SHIP orders whose prepayment check failed, oldest first.
pub async fn fetch_insufficient_ready_to_ship(
    shop_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE shop_id = $1 AND prepayment_status = $2 AND order_status = 'READY_TO_SHIP' ORDER BY \
         create_time ASC, id ASC",
        orders_table(shop_id)
    );
    let orders = sqlx::query_as(&sql).bind(shop_id).bind(PrepaymentStatus::Insufficient).fetch_all(conn).await?;
    Ok(orders)
}

/// Local `(order_status, update_time)` for each of the given order numbers that exists.
pub async fn fetch_statuses(
    shop_id: i64,
    order_sns: &[String],
    conn: &mut SqliteConnection,
) -> Result<HashMap<String, (String, i64)>, sqlx::Error> {
    if order_sns.is_empty() {
        return Ok(HashMap::new());
    }
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT order_sn, order_status, update_time FROM {} WHERE shop_id = ",
        orders_table(shop_id)
    ));
    builder.push_bind(shop_id).push(" AND order_sn IN (");
    let mut separated = builder.separated(", ");
    for sn in order_sns {
        separated.push_bind(sn);
    }
    separated.push_unseparated(")");
    let rows: Vec<(String, String, i64)> = builder.build_query_as().fetch_all(conn).await?;
    Ok(rows.into_iter().map(|(sn, status, t)| (sn, (status, t))).collect())
}

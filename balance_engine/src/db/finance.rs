use sqlx::SqliteConnection;

use crate::{
    db_types::{FinanceIncome, NewFinanceIncome, SettlementHandleStatus},
    shard::ShardedTable,
};

fn table(shop_id: i64) -> String {
    ShardedTable::FinanceIncomes.for_key(shop_id)
}

/// Inserts the wallet row unless its `transaction_id` is already stored. Returns true if a row was written.
pub async fn insert_if_absent(income: &NewFinanceIncome, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let sql = format!(
        r#"
            INSERT OR IGNORE INTO {} (
                shop_id, transaction_id, order_sn, refund_sn, transaction_type, status, wallet_type, amount,
                current_balance, transaction_fee, description, buyer_name, reason, money_flow, create_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
        table(income.shop_id)
    );
    let result = sqlx::query(&sql)
        .bind(income.shop_id)
        .bind(income.transaction_id)
        .bind(&income.order_sn)
        .bind(&income.refund_sn)
        .bind(&income.transaction_type)
        .bind(&income.status)
        .bind(&income.wallet_type)
        .bind(income.amount)
        .bind(income.current_balance)
        .bind(income.transaction_fee)
        .bind(&income.description)
        .bind(&income.buyer_name)
        .bind(&income.reason)
        .bind(&income.money_flow)
        .bind(income.create_time)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// The oldest unhandled income row of the given type for an order.
pub async fn fetch_pending_for_order(
    shop_id: i64,
    order_sn: &str,
    transaction_type: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<FinanceIncome>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2 AND transaction_type = $3 AND \
         settlement_handle_status = $4 ORDER BY create_time ASC, id ASC LIMIT 1",
        table(shop_id)
    );
    let row = sqlx::query_as(&sql)
        .bind(shop_id)
        .bind(order_sn)
        .bind(transaction_type)
        .bind(SettlementHandleStatus::Pending)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// Unhandled income rows of a type in one shard, oldest first.
pub async fn fetch_pending_of_type(
    shard: i64,
    transaction_type: &str,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<FinanceIncome>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE transaction_type = $1 AND settlement_handle_status = $2 ORDER BY create_time ASC, id \
         ASC LIMIT $3",
        ShardedTable::FinanceIncomes.table(shard)
    );
    let rows = sqlx::query_as(&sql)
        .bind(transaction_type)
        .bind(SettlementHandleStatus::Pending)
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

/// Marks the row handled. The status guard makes this a compare-and-swap; returns false if it was already handled.
pub async fn mark_handled(shop_id: i64, id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET settlement_handle_status = $1, settlement_handled_at = CURRENT_TIMESTAMP WHERE id = $2 AND \
         settlement_handle_status = $3",
        table(shop_id)
    );
    let result = sqlx::query(&sql)
        .bind(SettlementHandleStatus::Completed)
        .bind(id)
        .bind(SettlementHandleStatus::Pending)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_incomes(shop_id: i64, conn: &mut SqliteConnection) -> Result<Vec<FinanceIncome>, sqlx::Error> {
    let sql = format!("SELECT * FROM {} WHERE shop_id = $1 ORDER BY create_time ASC, id ASC", table(shop_id));
    let rows = sqlx::query_as(&sql).bind(shop_id).fetch_all(conn).await?;
    Ok(rows)
}

pub async fn count_incomes(shop_id: i64, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE shop_id = $1", table(shop_id));
    let count: i64 = sqlx::query_scalar(&sql).bind(shop_id).fetch_one(conn).await?;
    Ok(count)
}

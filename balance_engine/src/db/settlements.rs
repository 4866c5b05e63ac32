use balance_common::Money;
use sqlx::SqliteConnection;

use crate::{
    db_types::{OrderSettlement, ProfitShareRates, ProfitSplit, SettlementStatus},
    shard::{all_shards, ShardedTable},
};

fn table(shop_id: i64) -> String {
    ShardedTable::OrderSettlements.for_key(shop_id)
}

#[derive(Debug, Clone)]
pub struct NewSettlement {
    pub shop_id: i64,
    pub order_sn: String,
    pub operator_id: i64,
    pub shop_owner_id: i64,
    pub escrow_amount: Money,
    pub total_cost: Money,
    pub rates: ProfitShareRates,
    pub split: ProfitSplit,
}

pub async fn fetch_settlement(
    shop_id: i64,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderSettlement>, sqlx::Error> {
    let sql = format!("SELECT * FROM {} WHERE shop_id = $1 AND order_sn = $2", table(shop_id));
    let row = sqlx::query_as(&sql).bind(shop_id).bind(order_sn).fetch_optional(conn).await?;
    Ok(row)
}

/// Writes the settlement decision in the Pending state. A previous Pending or Cancelled attempt for the same order is
/// overwritten; a Completed one is never touched.
pub async fn upsert_pending(s: &NewSettlement, conn: &mut SqliteConnection) -> Result<Option<OrderSettlement>, sqlx::Error> {
    let sql = format!(
        r#"
            INSERT INTO {} (
                shop_id, order_sn, operator_id, shop_owner_id, escrow_amount, total_cost, profit, platform_rate,
                operator_rate, shop_owner_rate, platform_share, operator_share, shop_owner_share, operator_income,
                status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (shop_id, order_sn) DO UPDATE SET
                operator_id = excluded.operator_id,
                shop_owner_id = excluded.shop_owner_id,
                escrow_amount = excluded.escrow_amount,
                total_cost = excluded.total_cost,
                profit = excluded.profit,
                platform_rate = excluded.platform_rate,
                operator_rate = excluded.operator_rate,
                shop_owner_rate = excluded.shop_owner_rate,
                platform_share = excluded.platform_share,
                operator_share = excluded.operator_share,
                shop_owner_share = excluded.shop_owner_share,
                operator_income = excluded.operator_income,
                status = excluded.status
            WHERE status != $16
            RETURNING *;
        "#,
        table(s.shop_id)
    );
    let row = sqlx::query_as(&sql)
        .bind(s.shop_id)
        .bind(&s.order_sn)
        .bind(s.operator_id)
        .bind(s.shop_owner_id)
        .bind(s.escrow_amount)
        .bind(s.total_cost)
        .bind(s.split.profit)
        .bind(s.rates.platform)
        .bind(s.rates.operator)
        .bind(s.rates.shop_owner)
        .bind(s.split.platform_share)
        .bind(s.split.operator_share)
        .bind(s.split.shop_owner_share)
        .bind(s.split.operator_income)
        .bind(SettlementStatus::Pending)
        .bind(SettlementStatus::Completed)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn set_status(
    shop_id: i64,
    id: i64,
    status: SettlementStatus,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET status = $1, settled_at = CASE WHEN $1 = $2 THEN CURRENT_TIMESTAMP ELSE settled_at END WHERE \
         id = $3",
        table(shop_id)
    );
    sqlx::query(&sql).bind(status).bind(SettlementStatus::Completed).bind(id).execute(conn).await?;
    Ok(())
}

/// Records one more post-settlement adjustment against the settlement.
pub async fn record_adjustment(
    shop_id: i64,
    id: i64,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET adjustment_count = adjustment_count + 1, adjustment_total = adjustment_total + $1 WHERE id = $2",
        table(shop_id)
    );
    sqlx::query(&sql).bind(amount).bind(id).execute(conn).await?;
    Ok(())
}

/// Completed settlements whose `settled_at` falls on `date` (YYYY-MM-DD), across all shards.
pub async fn fetch_settled_on(date: &str, conn: &mut SqliteConnection) -> Result<Vec<OrderSettlement>, sqlx::Error> {
    let mut result = Vec::new();
    for shard in all_shards() {
        let sql = format!(
            "SELECT * FROM {} WHERE status = $1 AND date(settled_at) = $2",
            ShardedTable::OrderSettlements.table(shard)
        );
        let mut rows: Vec<OrderSettlement> =
            sqlx::query_as(&sql).bind(SettlementStatus::Completed).bind(date).fetch_all(&mut *conn).await?;
        result.append(&mut rows);
    }
    Ok(result)
}

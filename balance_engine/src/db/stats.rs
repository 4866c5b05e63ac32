use balance_common::Money;
use sqlx::SqliteConnection;

use crate::{
    db_types::{FinanceDailyStat, OrderDailyStat, PlatformDailyStat, SettlementStatus, ESCROW_ADJUSTMENT, ESCROW_VERIFIED_ADD},
    shard::ShardedTable,
};

/// Order counts for one shop on `date` (YYYY-MM-DD, UTC), bucketed by marketplace create time.
pub async fn compute_order_stat(
    shop_id: i64,
    date: &str,
    conn: &mut SqliteConnection,
) -> Result<OrderDailyStat, sqlx::Error> {
    let sql = format!(
        r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(total_amount), 0),
                COALESCE(SUM(CASE WHEN order_status = 'COMPLETED' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN order_status IN ('CANCELLED', 'CANCELLED_BEFORE_SHIP', 'IN_CANCEL', 'TO_RETURN')
                    THEN 1 ELSE 0 END), 0)
            FROM {}
            WHERE shop_id = $1 AND date(create_time, 'unixepoch') = $2
        "#,
        ShardedTable::Orders.for_key(shop_id)
    );
    let (order_count, total, completed, cancelled): (i64, i64, i64, i64) =
        sqlx::query_as(&sql).bind(shop_id).bind(date).fetch_one(conn).await?;
    Ok(OrderDailyStat {
        shop_id,
        stat_date: date.to_string(),
        order_count,
        total_amount: Money::from(total),
        completed_count: completed,
        cancelled_count: cancelled,
        in_flight_count: order_count - completed - cancelled,
    })
}

pub async fn compute_finance_stat(
    shop_id: i64,
    date: &str,
    conn: &mut SqliteConnection,
) -> Result<FinanceDailyStat, sqlx::Error> {
    let sql = format!(
        r#"
            SELECT
                COALESCE(SUM(CASE WHEN transaction_type = $1 THEN amount ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN transaction_type = $2 THEN amount ELSE 0 END), 0)
            FROM {}
            WHERE shop_id = $3 AND date(create_time, 'unixepoch') = $4
        "#,
        ShardedTable::FinanceIncomes.for_key(shop_id)
    );
    let (escrow, adjustments): (i64, i64) = sqlx::query_as(&sql)
        .bind(ESCROW_VERIFIED_ADD)
        .bind(ESCROW_ADJUSTMENT)
        .bind(shop_id)
        .bind(date)
        .fetch_one(&mut *conn)
        .await?;
    let sql = format!(
        r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(profit), 0),
                COALESCE(SUM(platform_share), 0),
                COALESCE(SUM(operator_share), 0),
                COALESCE(SUM(shop_owner_share), 0)
            FROM {}
            WHERE shop_id = $1 AND status = $2 AND date(settled_at) = $3
        "#,
        ShardedTable::OrderSettlements.for_key(shop_id)
    );
    let (count, profit, platform, operator, owner): (i64, i64, i64, i64, i64) = sqlx::query_as(&sql)
        .bind(shop_id)
        .bind(SettlementStatus::Completed)
        .bind(date)
        .fetch_one(conn)
        .await?;
    Ok(FinanceDailyStat {
        shop_id,
        stat_date: date.to_string(),
        escrow_income: Money::from(escrow),
        adjustment_amount: Money::from(adjustments),
        settled_profit: Money::from(profit),
        platform_share: Money::from(platform),
        operator_share: Money::from(operator),
        shop_owner_share: Money::from(owner),
        settlement_count: count,
    })
}

pub async fn upsert_order_stat(stat: &OrderDailyStat, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO order_daily_stats
                (shop_id, stat_date, order_count, total_amount, completed_count, cancelled_count, in_flight_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (shop_id, stat_date) DO UPDATE SET
                order_count = excluded.order_count,
                total_amount = excluded.total_amount,
                completed_count = excluded.completed_count,
                cancelled_count = excluded.cancelled_count,
                in_flight_count = excluded.in_flight_count
        "#,
    )
    .bind(stat.shop_id)
    .bind(&stat.stat_date)
    .bind(stat.order_count)
    .bind(stat.total_amount)
    .bind(stat.completed_count)
    .bind(stat.cancelled_count)
    .bind(stat.in_flight_count)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn upsert_finance_stat(stat: &FinanceDailyStat, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO finance_daily_stats (
                shop_id, stat_date, escrow_income, adjustment_amount, settled_profit, platform_share, operator_share,
                shop_owner_share, settlement_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (shop_id, stat_date) DO UPDATE SET
                escrow_income = excluded.escrow_income,
                adjustment_amount = excluded.adjustment_amount,
                settled_profit = excluded.settled_profit,
                platform_share = excluded.platform_share,
                operator_share = excluded.operator_share,
                shop_owner_share = excluded.shop_owner_share,
                settlement_count = excluded.settlement_count
        "#,
    )
    .bind(stat.shop_id)
    .bind(&stat.stat_date)
    .bind(stat.escrow_income)
    .bind(stat.adjustment_amount)
    .bind(stat.settled_profit)
    .bind(stat.platform_share)
    .bind(stat.operator_share)
    .bind(stat.shop_owner_share)
    .bind(stat.settlement_count)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn upsert_platform_stat(stat: &PlatformDailyStat, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO platform_daily_stats (
                stat_date, order_count, total_amount, escrow_income, settled_profit, platform_share, operator_share,
                shop_owner_share, active_shops
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (stat_date) DO UPDATE SET
                order_count = excluded.order_count,
                total_amount = excluded.total_amount,
                escrow_income = excluded.escrow_income,
                settled_profit = excluded.settled_profit,
                platform_share = excluded.platform_share,
                operator_share = excluded.operator_share,
                shop_owner_share = excluded.shop_owner_share,
                active_shops = excluded.active_shops
        "#,
    )
    .bind(&stat.stat_date)
    .bind(stat.order_count)
    .bind(stat.total_amount)
    .bind(stat.escrow_income)
    .bind(stat.settled_profit)
    .bind(stat.platform_share)
    .bind(stat.operator_share)
    .bind(stat.shop_owner_share)
    .bind(stat.active_shops)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn count_platform_stats(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM platform_daily_stats").fetch_one(conn).await?;
    Ok(count)
}

pub async fn fetch_order_stat(
    shop_id: i64,
    date: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderDailyStat>, sqlx::Error> {
    let stat = sqlx::query_as("SELECT * FROM order_daily_stats WHERE shop_id = $1 AND stat_date = $2")
        .bind(shop_id)
        .bind(date)
        .fetch_optional(conn)
        .await?;
    Ok(stat)
}

pub async fn fetch_finance_stat(
    shop_id: i64,
    date: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<FinanceDailyStat>, sqlx::Error> {
    let stat = sqlx::query_as("SELECT * FROM finance_daily_stats WHERE shop_id = $1 AND stat_date = $2")
        .bind(shop_id)
        .bind(date)
        .fetch_optional(conn)
        .await?;
    Ok(stat)
}

pub async fn fetch_platform_stat(date: &str, conn: &mut SqliteConnection) -> Result<Option<PlatformDailyStat>, sqlx::Error> {
    let stat = sqlx::query_as("SELECT * FROM platform_daily_stats WHERE stat_date = $1")
        .bind(date)
        .fetch_optional(conn)
        .await?;
    Ok(stat)
}

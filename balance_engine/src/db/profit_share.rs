use sqlx::SqliteConnection;

use crate::db_types::{ProfitShareConfig, ProfitShareRates};

/// The config in force right now for the pair, if any.
pub async fn fetch_active(
    shop_id: i64,
    operator_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<ProfitShareConfig>, sqlx::Error> {
    let config = sqlx::query_as(
        r#"
            SELECT * FROM profit_share_configs
            WHERE shop_id = $1 AND operator_id = $2
              AND effective_from <= CURRENT_TIMESTAMP
              AND (effective_to IS NULL OR effective_to > CURRENT_TIMESTAMP)
            ORDER BY id DESC
            LIMIT 1
        "#,
    )
    .bind(shop_id)
    .bind(operator_id)
    .fetch_optional(conn)
    .await?;
    Ok(config)
}

/// Closes any open config for the pair and inserts a new one effective immediately.
pub async fn replace_active(
    shop_id: i64,
    operator_id: i64,
    rates: &ProfitShareRates,
    conn: &mut SqliteConnection,
) -> Result<ProfitShareConfig, sqlx::Error> {
    sqlx::query(
        "UPDATE profit_share_configs SET effective_to = CURRENT_TIMESTAMP WHERE shop_id = $1 AND operator_id = $2 AND \
         effective_to IS NULL",
    )
    .bind(shop_id)
    .bind(operator_id)
    .execute(&mut *conn)
    .await?;
    let config = sqlx::query_as(
        r#"
            INSERT INTO profit_share_configs (shop_id, operator_id, platform_rate, operator_rate, shop_owner_rate)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(shop_id)
    .bind(operator_id)
    .bind(rates.platform)
    .bind(rates.operator)
    .bind(rates.shop_owner)
    .fetch_one(conn)
    .await?;
    Ok(config)
}

pub async fn fetch_history(
    shop_id: i64,
    operator_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<ProfitShareConfig>, sqlx::Error> {
    let configs = sqlx::query_as("SELECT * FROM profit_share_configs WHERE shop_id = $1 AND operator_id = $2 ORDER BY id")
        .bind(shop_id)
        .bind(operator_id)
        .fetch_all(conn)
        .await?;
    Ok(configs)
}

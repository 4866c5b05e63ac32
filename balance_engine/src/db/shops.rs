use sqlx::SqliteConnection;

use crate::db_types::{NewShop, Shop, ShopAuthorization};

pub async fn insert_shop(shop: &NewShop, conn: &mut SqliteConnection) -> Result<Shop, sqlx::Error> {
    let shop = sqlx::query_as(
        r#"
            INSERT INTO shops (shop_id, admin_id, shop_name, region, currency) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (shop_id) DO UPDATE SET
                admin_id = excluded.admin_id,
                shop_name = excluded.shop_name,
                region = excluded.region,
                currency = excluded.currency,
                updated_at = CURRENT_TIMESTAMP
            RETURNING *;
        "#,
    )
    .bind(shop.shop_id)
    .bind(shop.admin_id)
    .bind(&shop.shop_name)
    .bind(&shop.region)
    .bind(&shop.currency)
    .fetch_one(conn)
    .await?;
    Ok(shop)
}

pub async fn fetch_shop(shop_id: i64, conn: &mut SqliteConnection) -> Result<Option<Shop>, sqlx::Error> {
    let shop = sqlx::query_as("SELECT * FROM shops WHERE shop_id = $1").bind(shop_id).fetch_optional(conn).await?;
    Ok(shop)
}

pub async fn fetch_shops_for_admin(admin_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Shop>, sqlx::Error> {
    let shops =
        sqlx::query_as("SELECT * FROM shops WHERE admin_id = $1 ORDER BY shop_id").bind(admin_id).fetch_all(conn).await?;
    Ok(shops)
}

pub async fn fetch_all_shops(conn: &mut SqliteConnection) -> Result<Vec<Shop>, sqlx::Error> {
    let shops = sqlx::query_as("SELECT * FROM shops ORDER BY shop_id").fetch_all(conn).await?;
    Ok(shops)
}

/// Shops that have an authorization on file and the given sync toggle switched on.
pub async fn fetch_authorized_shops(finance: bool, conn: &mut SqliteConnection) -> Result<Vec<Shop>, sqlx::Error> {
    let shops = sqlx::query_as(
        r#"
            SELECT shops.* FROM shops
            JOIN shop_authorizations a ON a.shop_id = shops.shop_id
            WHERE CASE WHEN $1 THEN shops.sync_finance ELSE shops.sync_orders END
            ORDER BY shops.shop_id
        "#,
    )
    .bind(finance)
    .fetch_all(conn)
    .await?;
    Ok(shops)
}

pub async fn set_sync_toggles(
    shop_id: i64,
    sync_orders: bool,
    sync_finance: bool,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE shops SET sync_orders = $1, sync_finance = $2, updated_at = CURRENT_TIMESTAMP WHERE shop_id = $3",
    )
    .bind(sync_orders)
    .bind(sync_finance)
    .bind(shop_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_last_sync_at(shop_id: i64, last_sync_at: i64, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE shops SET last_sync_at = MAX(last_sync_at, $1), updated_at = CURRENT_TIMESTAMP WHERE shop_id = $2",
    )
    .bind(last_sync_at)
    .bind(shop_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_authorization(
    shop_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<ShopAuthorization>, sqlx::Error> {
    let auth = sqlx::query_as("SELECT * FROM shop_authorizations WHERE shop_id = $1")
        .bind(shop_id)
        .fetch_optional(conn)
        .await?;
    Ok(auth)
}

pub async fn upsert_authorization(auth: &ShopAuthorization, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO shop_authorizations (shop_id, access_token, refresh_token, access_expires_at, refresh_expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (shop_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                access_expires_at = excluded.access_expires_at,
                refresh_expires_at = excluded.refresh_expires_at,
                updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(auth.shop_id)
    .bind(&auth.access_token)
    .bind(&auth.refresh_token)
    .bind(auth.access_expires_at)
    .bind(auth.refresh_expires_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn link_operator(shop_id: i64, operator_id: i64, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO shop_operator_relations (shop_id, operator_id) VALUES ($1, $2) ON CONFLICT (shop_id, \
         operator_id) DO UPDATE SET active = TRUE",
    )
    .bind(shop_id)
    .bind(operator_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn is_operator_of(shop_id: i64, operator_id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM shop_operator_relations WHERE shop_id = $1 AND operator_id = $2 AND active",
    )
    .bind(shop_id)
    .bind(operator_id)
    .fetch_optional(conn)
    .await?;
    Ok(found.is_some())
}

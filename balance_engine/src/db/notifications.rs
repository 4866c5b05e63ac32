use sqlx::SqliteConnection;

use crate::db_types::Notification;

pub async fn insert_notification(
    admin_id: i64,
    shop_id: i64,
    notification_type: &str,
    title: &str,
    content: &str,
    conn: &mut SqliteConnection,
) -> Result<Notification, sqlx::Error> {
    let notification = sqlx::query_as(
        r#"
            INSERT INTO notifications (admin_id, shop_id, notification_type, title, content)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(admin_id)
    .bind(shop_id)
    .bind(notification_type)
    .bind(title)
    .bind(content)
    .fetch_one(conn)
    .await?;
    Ok(notification)
}

pub async fn fetch_for_admin(admin_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Notification>, sqlx::Error> {
    let rows = sqlx::query_as("SELECT * FROM notifications WHERE admin_id = $1 ORDER BY id")
        .bind(admin_id)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

pub async fn mark_read(id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = $1").bind(id).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

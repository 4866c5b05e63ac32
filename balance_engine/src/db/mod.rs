//! SQLite persistence.
//!
//! Each submodule is a set of free functions over a `&mut SqliteConnection`, so callers can compose them inside a
//! single transaction (pass `&mut *tx`) or run them on a pooled connection. None of them commit or retry.
//!
//! SQLite has no `SELECT .. FOR UPDATE`. Row locks are taken by making a no-op write (`UPDATE t SET id = id WHERE
//! ..`) the first statement of a transaction, which grabs the database write lock until commit. Starting every
//! mutating transaction with a write also means SQLite never has to upgrade a read lock, which would fail with
//! `SQLITE_BUSY` under contention instead of waiting.
pub mod accounts;
pub mod escrows;
pub mod finance;
pub mod notifications;
pub mod operation_logs;
pub mod orders;
pub mod profit_share;
pub mod returns;
pub mod schema;
pub mod settlements;
pub mod shipments;
pub mod shops;
pub mod stats;
pub mod sync_records;

use std::{env, fmt::Debug, str::FromStr, time::Duration};

use log::*;
use sqlx::{
    migrate,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

const SQLITE_DB_URL: &str = "sqlite://data/balance.db";

pub fn db_url() -> String {
    let result = env::var("BAL_DATABASE_URL").unwrap_or_else(|_| {
        info!("🪛️ BAL_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

/// The process-wide database handle. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Connects using `BAL_DATABASE_URL` and runs all migrations.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        let db = Self::new_with_url(&url, max_connections).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Connects without running migrations.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        trace!("🗃️ Connected to {url}");
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies the unsharded migrations, then makes sure every shard table exists.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        migrate!("./src/db/migrations").run(&self.pool).await?;
        let mut conn = self.pool.acquire().await?;
        schema::create_sharded_tables(&mut conn).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

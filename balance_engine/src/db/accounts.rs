use balance_common::{Money, DEFAULT_CURRENCY};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Account, AccountStatus, AccountTransaction, AccountType, TransactionType},
    shard::ledger_table,
};

/// A ledger row that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewAccountTransaction {
    pub transaction_no: String,
    pub admin_id: i64,
    pub account_type: AccountType,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub frozen_before: Money,
    pub frozen_after: Money,
    pub related_order_sn: Option<String>,
    pub remark: String,
    pub operator_id: Option<i64>,
}

/// Balance columns written back after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balances {
    pub balance: Money,
    pub frozen_amount: Money,
    pub total_credited: Money,
    pub total_debited: Money,
}

impl From<&Account> for Balances {
    fn from(a: &Account) -> Self {
        Self {
            balance: a.balance,
            frozen_amount: a.frozen_amount,
            total_credited: a.total_credited,
            total_debited: a.total_debited,
        }
    }
}

pub async fn fetch_account(
    admin_id: i64,
    account_type: AccountType,
    conn: &mut SqliteConnection,
) -> Result<Option<Account>, sqlx::Error> {
    let account = sqlx::query_as("SELECT * FROM accounts WHERE admin_id = $1 AND account_type = $2")
        .bind(admin_id)
        .bind(account_type)
        .fetch_optional(conn)
        .await?;
    Ok(account)
}

pub async fn fetch_accounts_for_admin(admin_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Account>, sqlx::Error> {
    let accounts = sqlx::query_as("SELECT * FROM accounts WHERE admin_id = $1 ORDER BY id")
        .bind(admin_id)
        .fetch_all(conn)
        .await?;
    Ok(accounts)
}

/// Creates the account if it does not exist, then takes the row lock and returns the current state. Must be the
/// first write of the enclosing transaction for the lock to cover the subsequent read.
pub async fn fetch_or_create_locked(
    admin_id: i64,
    account_type: AccountType,
    conn: &mut SqliteConnection,
) -> Result<Account, sqlx::Error> {
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO accounts (admin_id, account_type, currency) VALUES ($1, $2, $3)",
    )
    .bind(admin_id)
    .bind(account_type)
    .bind(DEFAULT_CURRENCY)
    .execute(&mut *conn)
    .await?;
    if inserted.rows_affected() > 0 {
        debug!("🗃️ Created {account_type} account for admin {admin_id}");
    }
    lock_account(admin_id, account_type, conn).await?;
    fetch_account(admin_id, account_type, conn).await?.ok_or(sqlx::Error::RowNotFound)
}

/// Takes the row lock on an account. Returns false if there is no such account.
pub async fn lock_account(
    admin_id: i64,
    account_type: AccountType,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE accounts SET id = id WHERE admin_id = $1 AND account_type = $2")
        .bind(admin_id)
        .bind(account_type)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_balances(id: i64, balances: Balances, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            UPDATE accounts SET
                balance = $1,
                frozen_amount = $2,
                total_credited = $3,
                total_debited = $4,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $5
        "#,
    )
    .bind(balances.balance)
    .bind(balances.frozen_amount)
    .bind(balances.total_credited)
    .bind(balances.total_debited)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_required_amount(id: i64, required: Money, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET required_amount = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(required)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_status(id: i64, status: AccountStatus, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_transaction(
    tx: NewAccountTransaction,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, sqlx::Error> {
    let sql = format!(
        r#"
            INSERT INTO {} (
                transaction_no,
                admin_id,
                account_type,
                transaction_type,
                amount,
                balance_before,
                balance_after,
                frozen_before,
                frozen_after,
                related_order_sn,
                remark,
                operator_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *;
        "#,
        ledger_table(tx.admin_id)
    );
    let row = sqlx::query_as(&sql)
        .bind(tx.transaction_no)
        .bind(tx.admin_id)
        .bind(tx.account_type)
        .bind(tx.transaction_type)
        .bind(tx.amount)
        .bind(tx.balance_before)
        .bind(tx.balance_after)
        .bind(tx.frozen_before)
        .bind(tx.frozen_after)
        .bind(tx.related_order_sn)
        .bind(tx.remark)
        .bind(tx.operator_id)
        .fetch_one(conn)
        .await?;
    Ok(row)
}

/// Ledger rows for one account, oldest first.
pub async fn fetch_transactions(
    admin_id: i64,
    account_type: AccountType,
    limit: i64,
    offset: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<AccountTransaction>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE admin_id = $1 AND account_type = $2 ORDER BY id ASC LIMIT $3 OFFSET $4",
        ledger_table(admin_id)
    );
    let rows = sqlx::query_as(&sql).bind(admin_id).bind(account_type).bind(limit).bind(offset).fetch_all(conn).await?;
    Ok(rows)
}

pub async fn fetch_transactions_for_order(
    admin_id: i64,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<AccountTransaction>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM {} WHERE admin_id = $1 AND related_order_sn = $2 ORDER BY id ASC",
        ledger_table(admin_id)
    );
    let rows = sqlx::query_as(&sql).bind(admin_id).bind(order_sn).fetch_all(conn).await?;
    Ok(rows)
}

pub async fn count_transactions_of_type(
    admin_id: i64,
    transaction_type: TransactionType,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<i64, sqlx::Error> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE admin_id = $1 AND transaction_type = $2 AND related_order_sn = $3",
        ledger_table(admin_id)
    );
    let count: i64 =
        sqlx::query_scalar(&sql).bind(admin_id).bind(transaction_type).bind(order_sn).fetch_one(conn).await?;
    Ok(count)
}

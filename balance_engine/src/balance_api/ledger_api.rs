use std::fmt::Debug;

use balance_common::Money;
use log::*;

use crate::{
    balance_api::errors::LedgerError,
    db::accounts,
    db_types::{Account, AccountStatus, AccountTransaction, AccountType},
    events::{EventProducers, RechargedEvent},
    ledger,
    SqliteDatabase,
};

/// `LedgerApi` runs single ledger operations in their own transaction. Engines that need to combine money
/// movements with entity updates call the functions in [`crate::ledger`] directly on their own transaction instead.
#[derive(Clone)]
pub struct LedgerApi {
    db: SqliteDatabase,
    producers: EventProducers,
}

impl Debug for LedgerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi")
    }
}

impl LedgerApi {
    pub fn new(db: SqliteDatabase, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    /// Tops up the shop owner's prepayment account and notifies the recharge hook, which retries orders that were
    /// previously short of funds.
    pub async fn recharge(
        &self,
        admin_id: i64,
        amount: Money,
        remark: &str,
        operator_id: Option<i64>,
    ) -> Result<AccountTransaction, LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let row = ledger::recharge(admin_id, amount, remark, operator_id, &mut tx).await?;
        tx.commit().await?;
        info!("💰️ Recharge of {amount} for admin {admin_id} committed ({})", row.transaction_no);
        self.producers.publish_recharged(RechargedEvent::new(admin_id, amount)).await;
        Ok(row)
    }

    pub async fn pay_deposit(
        &self,
        admin_id: i64,
        amount: Money,
        remark: &str,
        operator_id: Option<i64>,
    ) -> Result<AccountTransaction, LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let row = ledger::pay_deposit(admin_id, amount, remark, operator_id, &mut tx).await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn refund_deposit(
        &self,
        admin_id: i64,
        amount: Money,
        remark: &str,
        operator_id: Option<i64>,
    ) -> Result<AccountTransaction, LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let row = ledger::refund_deposit(admin_id, amount, remark, operator_id, &mut tx).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Sets the deposit a shop owner is expected to keep on file.
    pub async fn set_deposit_requirement(&self, admin_id: i64, required: Money) -> Result<Account, LedgerError> {
        if required.is_negative() {
            return Err(LedgerError::InvalidAmount(required));
        }
        let mut tx = self.db.pool().begin().await?;
        let account = ledger::get_or_create(admin_id, AccountType::Deposit, &mut tx).await?;
        accounts::set_required_amount(account.id, required, &mut tx).await?;
        let account = accounts::fetch_account(admin_id, AccountType::Deposit, &mut tx)
            .await?
            .ok_or(LedgerError::AccountNotFound { admin_id, account_type: AccountType::Deposit })?;
        tx.commit().await?;
        Ok(account)
    }

    pub async fn record_penalty(&self, admin_id: i64, amount: Money, remark: &str) -> Result<AccountTransaction, LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let row = ledger::record_penalty(admin_id, amount, remark, &mut tx).await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn record_bonus(&self, admin_id: i64, amount: Money, remark: &str) -> Result<AccountTransaction, LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let row = ledger::record_bonus(admin_id, amount, remark, &mut tx).await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn withdraw(
        &self,
        admin_id: i64,
        account_type: AccountType,
        amount: Money,
        remark: &str,
    ) -> Result<AccountTransaction, LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let row = ledger::withdraw(admin_id, account_type, amount, remark, &mut tx).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Freezes or unfreezes an account. Ledger operations on a frozen account fail with `AccountLocked`.
    pub async fn set_account_status(
        &self,
        admin_id: i64,
        account_type: AccountType,
        status: AccountStatus,
    ) -> Result<(), LedgerError> {
        let mut tx = self.db.pool().begin().await?;
        let account = ledger::get_or_create(admin_id, account_type, &mut tx).await?;
        accounts::set_status(account.id, status, &mut tx).await?;
        tx.commit().await?;
        info!("💰️ The {account_type} account of admin {admin_id} is now {status:?}");
        Ok(())
    }

    /// The account, or `None` if it has never been used.
    pub async fn account(&self, admin_id: i64, account_type: AccountType) -> Result<Option<Account>, LedgerError> {
        let mut conn = self.db.pool().acquire().await?;
        let account = accounts::fetch_account(admin_id, account_type, &mut conn).await?;
        Ok(account)
    }

    pub async fn platform_account(&self) -> Result<Option<Account>, LedgerError> {
        self.account(ledger::PLATFORM_ADMIN_ID, AccountType::PlatformCommission).await
    }

    pub async fn accounts_for_admin(&self, admin_id: i64) -> Result<Vec<Account>, LedgerError> {
        let mut conn = self.db.pool().acquire().await?;
        let accounts = accounts::fetch_accounts_for_admin(admin_id, &mut conn).await?;
        Ok(accounts)
    }

    pub async fn list_transactions(
        &self,
        admin_id: i64,
        account_type: AccountType,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<AccountTransaction>, LedgerError> {
        let mut conn = self.db.pool().acquire().await?;
        ledger::list_transactions(admin_id, account_type, page, page_size, &mut conn).await
    }

    pub async fn transactions_for_order(
        &self,
        admin_id: i64,
        order_sn: &str,
    ) -> Result<Vec<AccountTransaction>, LedgerError> {
        let mut conn = self.db.pool().acquire().await?;
        let rows = accounts::fetch_transactions_for_order(admin_id, order_sn, &mut conn).await?;
        Ok(rows)
    }
}

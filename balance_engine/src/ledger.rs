//! Balance mutations on the seven account kinds.
//!
//! Every operation here runs on a connection that the caller has already placed inside a transaction, so that money
//! movements commit or roll back together with the entity updates that caused them. An operation:
//!
//! 1. creates the account if needed and takes its row lock,
//! 2. checks the precondition against the locked balances,
//! 3. writes the new balances,
//! 4. appends one ledger row with before/after snapshots.
//!
//! Nothing in this module performs I/O other than database statements, and nothing sleeps.
//!
//! Ledger rows satisfy `amount == balance_after - balance_before`. Operations that only move frozen funds (settling
//! prepayment) therefore write a zero amount and record the movement in `frozen_before`/`frozen_after`.
use std::time::{SystemTime, UNIX_EPOCH};

use balance_common::Money;
use log::*;
use rand::Rng;
use sqlx::SqliteConnection;

use crate::{
    balance_api::errors::LedgerError,
    db::accounts::{self, Balances, NewAccountTransaction},
    db_types::{Account, AccountStatus, AccountTransaction, AccountType, TransactionType},
};

/// The platform commission account is a singleton owned by this admin id.
pub const PLATFORM_ADMIN_ID: i64 = 0;

/// `<3-letter account prefix><unix nanos><3 random digits>`
pub fn new_transaction_no(account_type: AccountType) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
    let suffix = rand::thread_rng().gen_range(0..1000);
    format!("{}{nanos}{suffix:03}", account_type.tx_prefix())
}

/// Describes the ledger row an operation will write.
#[derive(Debug, Clone, Copy)]
struct Entry<'a> {
    admin_id: i64,
    account_type: AccountType,
    transaction_type: TransactionType,
    order_sn: Option<&'a str>,
    remark: &'a str,
    operator_id: Option<i64>,
}

impl<'a> Entry<'a> {
    fn new(admin_id: i64, account_type: AccountType, transaction_type: TransactionType) -> Self {
        Self { admin_id, account_type, transaction_type, order_sn: None, remark: "", operator_id: None }
    }

    fn order(mut self, order_sn: Option<&'a str>) -> Self {
        self.order_sn = order_sn.filter(|s| !s.is_empty());
        self
    }

    fn remark(mut self, remark: &'a str) -> Self {
        self.remark = remark;
        self
    }

    fn operator(mut self, operator_id: Option<i64>) -> Self {
        self.operator_id = operator_id;
        self
    }
}

fn positive(amount: Money) -> Result<(), LedgerError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}

fn require_balance(account: &Account, amount: Money) -> Result<(), LedgerError> {
    if account.balance < amount {
        return Err(LedgerError::InsufficientBalance {
            admin_id: account.admin_id,
            account_type: account.account_type,
            available: account.balance,
            required: amount,
        });
    }
    Ok(())
}

fn require_frozen(account: &Account, amount: Money) -> Result<(), LedgerError> {
    if account.frozen_amount < amount {
        return Err(LedgerError::InsufficientFrozen {
            admin_id: account.admin_id,
            account_type: account.account_type,
            available: account.frozen_amount,
            required: amount,
        });
    }
    Ok(())
}

/// Locks the account, lets `change` compute the new balances, persists them and appends the ledger row.
async fn apply<F>(entry: Entry<'_>, conn: &mut SqliteConnection, change: F) -> Result<AccountTransaction, LedgerError>
where F: FnOnce(&Account) -> Result<Balances, LedgerError> {
    let account = accounts::fetch_or_create_locked(entry.admin_id, entry.account_type, &mut *conn).await?;
    if account.status == AccountStatus::Frozen {
        return Err(LedgerError::AccountLocked { admin_id: entry.admin_id, account_type: entry.account_type });
    }
    let before = Balances::from(&account);
    let after = change(&account)?;
    if after.balance.is_negative() {
        return Err(LedgerError::InsufficientBalance {
            admin_id: entry.admin_id,
            account_type: entry.account_type,
            available: before.balance,
            required: before.balance - after.balance,
        });
    }
    if after.frozen_amount.is_negative() {
        return Err(LedgerError::InsufficientFrozen {
            admin_id: entry.admin_id,
            account_type: entry.account_type,
            available: before.frozen_amount,
            required: before.frozen_amount - after.frozen_amount,
        });
    }
    accounts::update_balances(account.id, after, &mut *conn).await?;
    let row = NewAccountTransaction {
        transaction_no: new_transaction_no(entry.account_type),
        admin_id: entry.admin_id,
        account_type: entry.account_type,
        transaction_type: entry.transaction_type,
        amount: after.balance - before.balance,
        balance_before: before.balance,
        balance_after: after.balance,
        frozen_before: before.frozen_amount,
        frozen_after: after.frozen_amount,
        related_order_sn: entry.order_sn.map(String::from),
        remark: entry.remark.to_string(),
        operator_id: entry.operator_id,
    };
    let tx = accounts::insert_transaction(row, conn).await?;
    trace!(
        "💰️ {} {:?} on {} account of admin {}: balance {} -> {}, frozen {} -> {}",
        tx.transaction_no,
        tx.transaction_type,
        tx.account_type,
        tx.admin_id,
        tx.balance_before,
        tx.balance_after,
        tx.frozen_before,
        tx.frozen_after
    );
    Ok(tx)
}

/// Adds `amount` to the balance and to lifetime credits.
async fn credit(
    entry: Entry<'_>,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    positive(amount)?;
    apply(entry, conn, |a| {
        let mut b = Balances::from(a);
        b.balance += amount;
        b.total_credited += amount;
        Ok(b)
    })
    .await
}

/// Removes `amount` from the balance and adds it to lifetime debits.
async fn debit(entry: Entry<'_>, amount: Money, conn: &mut SqliteConnection) -> Result<AccountTransaction, LedgerError> {
    positive(amount)?;
    apply(entry, conn, |a| {
        require_balance(a, amount)?;
        let mut b = Balances::from(a);
        b.balance -= amount;
        b.total_debited += amount;
        Ok(b)
    })
    .await
}

/// Returns the account, creating it with zero balances if it does not exist yet.
pub async fn get_or_create(
    admin_id: i64,
    account_type: AccountType,
    conn: &mut SqliteConnection,
) -> Result<Account, LedgerError> {
    let account = accounts::fetch_or_create_locked(admin_id, account_type, conn).await?;
    Ok(account)
}

//--------------------------------------     Prepayment      ---------------------------------------------------------
pub async fn recharge(
    admin_id: i64,
    amount: Money,
    remark: &str,
    operator_id: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(admin_id, AccountType::Prepayment, TransactionType::Recharge)
        .remark(remark)
        .operator(operator_id);
    let tx = credit(entry, amount, conn).await?;
    debug!("💰️ Admin {admin_id} recharged {amount}. Prepayment balance is now {}", tx.balance_after);
    Ok(tx)
}

/// Moves `amount` of available prepayment into the frozen bucket.
pub async fn freeze_prepayment(
    admin_id: i64,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    positive(amount)?;
    let entry = Entry::new(admin_id, AccountType::Prepayment, TransactionType::Freeze)
        .order(Some(order_sn))
        .remark("order cost reserved");
    apply(entry, conn, |a| {
        require_balance(a, amount)?;
        let mut b = Balances::from(a);
        b.balance -= amount;
        b.frozen_amount += amount;
        Ok(b)
    })
    .await
}

pub async fn unfreeze_prepayment(
    admin_id: i64,
    amount: Money,
    order_sn: &str,
    remark: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    positive(amount)?;
    let entry =
        Entry::new(admin_id, AccountType::Prepayment, TransactionType::Unfreeze).order(Some(order_sn)).remark(remark);
    apply(entry, conn, |a| {
        require_frozen(a, amount)?;
        let mut b = Balances::from(a);
        b.frozen_amount -= amount;
        b.balance += amount;
        Ok(b)
    })
    .await
}

/// Consumes frozen prepayment. The balance is untouched, so the ledger row has a zero amount.
pub async fn settle_prepayment(
    admin_id: i64,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    positive(amount)?;
    let entry = Entry::new(admin_id, AccountType::Prepayment, TransactionType::OrderPay)
        .order(Some(order_sn))
        .remark("order settled");
    apply(entry, conn, |a| {
        require_frozen(a, amount)?;
        let mut b = Balances::from(a);
        b.frozen_amount -= amount;
        b.total_debited += amount;
        Ok(b)
    })
    .await
}

/// Credits prepayment with money coming back from a marketplace adjustment.
pub async fn refund_prepayment_adjustment(
    admin_id: i64,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    positive(amount)?;
    let entry = Entry::new(admin_id, AccountType::Prepayment, TransactionType::OrderRefund)
        .order(Some(order_sn))
        .remark("adjustment refund");
    apply(entry, conn, |a| {
        let mut b = Balances::from(a);
        b.balance += amount;
        Ok(b)
    })
    .await
}

//--------------------------------------       Escrow        ---------------------------------------------------------
pub async fn transfer_to_escrow(
    admin_id: i64,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(admin_id, AccountType::Escrow, TransactionType::EscrowIn)
        .order(Some(order_sn))
        .remark("order shipped");
    credit(entry, amount, conn).await
}

pub async fn transfer_from_escrow(
    admin_id: i64,
    amount: Money,
    order_sn: &str,
    remark: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry =
        Entry::new(admin_id, AccountType::Escrow, TransactionType::EscrowOut).order(Some(order_sn)).remark(remark);
    debit(entry, amount, conn).await
}

//--------------------------------------  Income accounts    ---------------------------------------------------------
pub async fn add_operator_income(
    operator_id: i64,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(operator_id, AccountType::Operator, TransactionType::CostSettle)
        .order(Some(order_sn))
        .remark("cost and profit share");
    credit(entry, amount, conn).await
}

pub async fn add_shop_owner_commission(
    admin_id: i64,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(admin_id, AccountType::ShopOwnerCommission, TransactionType::ProfitShare)
        .order(Some(order_sn))
        .remark("profit share");
    credit(entry, amount, conn).await
}

pub async fn add_platform_commission(
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(PLATFORM_ADMIN_ID, AccountType::PlatformCommission, TransactionType::PlatformFee)
        .order(Some(order_sn))
        .remark("platform share");
    credit(entry, amount, conn).await
}

pub async fn deduct_operator_balance(
    operator_id: i64,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(operator_id, AccountType::Operator, TransactionType::Adjustment)
        .order(Some(order_sn))
        .remark("adjustment");
    debit(entry, amount, conn).await
}

pub async fn deduct_shop_owner_commission(
    admin_id: i64,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(admin_id, AccountType::ShopOwnerCommission, TransactionType::Adjustment)
        .order(Some(order_sn))
        .remark("adjustment");
    debit(entry, amount, conn).await
}

pub async fn deduct_platform_commission(
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(PLATFORM_ADMIN_ID, AccountType::PlatformCommission, TransactionType::Adjustment)
        .order(Some(order_sn))
        .remark("adjustment");
    debit(entry, amount, conn).await
}

/// Signed variant used by adjustments: positive amounts credit the account, negative ones debit it.
pub async fn adjust(
    admin_id: i64,
    account_type: AccountType,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<AccountTransaction>, LedgerError> {
    if amount.is_zero() {
        return Ok(None);
    }
    let entry = Entry::new(admin_id, account_type, TransactionType::Adjustment).order(Some(order_sn)).remark("adjustment");
    let tx = if amount.is_positive() { credit(entry, amount, conn).await? } else { debit(entry, -amount, conn).await? };
    Ok(Some(tx))
}

//--------------------------------------      Deposit        ---------------------------------------------------------
pub async fn pay_deposit(
    admin_id: i64,
    amount: Money,
    remark: &str,
    operator_id: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry =
        Entry::new(admin_id, AccountType::Deposit, TransactionType::DepositPay).remark(remark).operator(operator_id);
    credit(entry, amount, conn).await
}

pub async fn refund_deposit(
    admin_id: i64,
    amount: Money,
    remark: &str,
    operator_id: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry =
        Entry::new(admin_id, AccountType::Deposit, TransactionType::DepositRefund).remark(remark).operator(operator_id);
    debit(entry, amount, conn).await
}

//--------------------------------------   Penalty & bonus   ---------------------------------------------------------
/// Penalties accumulate on the account; bonuses are paid out of it.
pub async fn record_penalty(
    admin_id: i64,
    amount: Money,
    remark: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(admin_id, AccountType::PenaltyBonus, TransactionType::Penalty).remark(remark);
    credit(entry, amount, conn).await
}

pub async fn record_bonus(
    admin_id: i64,
    amount: Money,
    remark: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    let entry = Entry::new(admin_id, AccountType::PenaltyBonus, TransactionType::Bonus).remark(remark);
    debit(entry, amount, conn).await
}

//--------------------------------------      Withdraw       ---------------------------------------------------------
pub async fn withdraw(
    admin_id: i64,
    account_type: AccountType,
    amount: Money,
    remark: &str,
    conn: &mut SqliteConnection,
) -> Result<AccountTransaction, LedgerError> {
    if !matches!(account_type, AccountType::Operator | AccountType::ShopOwnerCommission) {
        return Err(LedgerError::UnsupportedAccount(account_type));
    }
    let entry = Entry::new(admin_id, account_type, TransactionType::Withdraw).remark(remark);
    let tx = debit(entry, amount, conn).await?;
    info!("💰️ Admin {admin_id} withdrew {amount} from their {account_type} account");
    Ok(tx)
}

/// One page of an account's ledger, oldest first. Pages are numbered from 1.
pub async fn list_transactions(
    admin_id: i64,
    account_type: AccountType,
    page: i64,
    page_size: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<AccountTransaction>, LedgerError> {
    let page_size = page_size.clamp(1, 500);
    let offset = (page.max(1) - 1) * page_size;
    let rows = accounts::fetch_transactions(admin_id, account_type, page_size, offset, conn).await?;
    Ok(rows)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transaction_numbers() {
        let no = new_transaction_no(AccountType::Escrow);
        assert!(no.starts_with("ESC"));
        assert!(no[3..].chars().all(|c| c.is_ascii_digit()));
        assert!(no.len() >= 3 + 19 + 3);
        assert_ne!(new_transaction_no(AccountType::Prepayment), new_transaction_no(AccountType::Prepayment));
    }
}

use balance_common::Money;
use shopee_tools::ShopeeApiError;
use thiserror::Error;

use crate::{
    db_types::AccountType,
    kv::{KvError, LockError},
};

macro_rules! db_error {
    ($($name:ident),+) => {
        $(
            impl From<sqlx::Error> for $name {
                fn from(e: sqlx::Error) -> Self {
                    Self::DatabaseError(e.to_string())
                }
            }
        )+
    };
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Amount must be positive, but was {0}")]
    InvalidAmount(Money),
    #[error("Insufficient balance in {account_type} account of admin {admin_id}: {available} available, {required} required")]
    InsufficientBalance { admin_id: i64, account_type: AccountType, available: Money, required: Money },
    #[error("Insufficient frozen funds in {account_type} account of admin {admin_id}: {available} frozen, {required} required")]
    InsufficientFrozen { admin_id: i64, account_type: AccountType, available: Money, required: Money },
    #[error("The {account_type} account of admin {admin_id} is locked")]
    AccountLocked { admin_id: i64, account_type: AccountType },
    #[error("The {account_type} account of admin {admin_id} does not exist")]
    AccountNotFound { admin_id: i64, account_type: AccountType },
    #[error("{0} accounts do not support this operation")]
    UnsupportedAccount(AccountType),
}

impl LedgerError {
    /// Business outcomes, as opposed to infrastructure failures.
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::DatabaseError(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Shop {0} has no authorization")]
    NotAuthorized(i64),
    #[error("The refresh token for shop {0} has expired. The shop must be re-authorized")]
    RefreshExpired(i64),
    #[error("Token refresh failed: {0}")]
    Marketplace(#[from] ShopeeApiError),
    #[error("Key-value store error: {0}")]
    Kv(#[from] KvError),
}

#[derive(Debug, Clone, Error)]
pub enum OrderEngineError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Shop {0} does not exist")]
    ShopNotFound(i64),
    #[error("Order {0} is not in a state that allows this operation: {1}")]
    InvalidState(String, String),
    #[error("Marketplace error: {0}")]
    Marketplace(#[from] ShopeeApiError),
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Key-value store error: {0}")]
    Kv(#[from] KvError),
    #[error("Prepayment error: {0}")]
    Prepayment(#[from] PrepaymentError),
}

#[derive(Debug, Clone, Error)]
pub enum PrepaymentError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Shop {0} does not exist")]
    ShopNotFound(i64),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Error)]
pub enum ReturnEngineError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Return {0} does not exist")]
    ReturnNotFound(String),
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Shop {0} does not exist")]
    ShopNotFound(i64),
    #[error("Return {0} is not being processed by this worker")]
    NotProcessing(String),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, Error)]
pub enum ShipmentError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Shop {0} does not exist")]
    ShopNotFound(i64),
    #[error("Order {order_sn} cannot be shipped: {reason}")]
    NotShippable { order_sn: String, reason: String },
    #[error("Order {0} has already been shipped")]
    AlreadyShipped(String),
    #[error("Operator {operator_id} does not serve shop {shop_id}")]
    NotOperator { shop_id: i64, operator_id: i64 },
    #[error("Costs must not be negative")]
    InvalidCost,
    #[error("The marketplace did not answer the ship call in time")]
    Timeout,
    #[error("The marketplace rejected the shipment: {0}")]
    Marketplace(#[from] ShopeeApiError),
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Order {0} has no shipped record and cannot be settled yet")]
    NotReady(String),
    #[error("Order {0} has already been settled")]
    AlreadySettled(String),
    #[error("Profit share rates must add up to 100%")]
    InvalidProfitShare,
    #[error("Settlement {0} does not exist")]
    SettlementNotFound(String),
    #[error("Settlement of order {0} has reached the adjustment limit")]
    TooManyAdjustments(String),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("A sync for shop {0} is already running")]
    AlreadyRunning(i64),
    #[error("Shop {0} does not exist")]
    ShopNotFound(i64),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("Marketplace error: {0}")]
    Marketplace(#[from] ShopeeApiError),
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),
    #[error("Order engine error: {0}")]
    Order(#[from] OrderEngineError),
    #[error("Return engine error: {0}")]
    Return(#[from] ReturnEngineError),
    #[error("Key-value store error: {0}")]
    Kv(#[from] KvError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, Error)]
pub enum MaintenanceError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Malformed webhook payload: {0}")]
    InvalidPayload(String),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
    #[error("Order engine error: {0}")]
    Order(#[from] OrderEngineError),
    #[error("Return engine error: {0}")]
    Return(#[from] ReturnEngineError),
    #[error("Marketplace error: {0}")]
    Marketplace(#[from] ShopeeApiError),
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),
    #[error("Key-value store error: {0}")]
    Kv(#[from] KvError),
}

db_error!(
    LedgerError,
    AuthError,
    OrderEngineError,
    PrepaymentError,
    ReturnEngineError,
    ShipmentError,
    SettlementError,
    SyncError,
    MaintenanceError,
    WebhookError
);

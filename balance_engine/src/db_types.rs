//! Rows and enums persisted by the engine.
use std::{fmt::Display, str::FromStr};

use balance_common::{Money, Rate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

//--------------------------------------     OrderStatus     ---------------------------------------------------------
/// Marketplace order states. Anything the marketplace invents later maps to `Unknown`, which has the lowest
/// priority so that it never blocks a known transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Unpaid,
    InvoicePending,
    ReadyToShip,
    Processed,
    Shipped,
    Completed,
    InCancel,
    ToReturn,
    CancelledBeforeShip,
    Cancelled,
    Unknown(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::InvoicePending => "INVOICE_PENDING",
            Self::ReadyToShip => "READY_TO_SHIP",
            Self::Processed => "PROCESSED",
            Self::Shipped => "SHIPPED",
            Self::Completed => "COMPLETED",
            Self::InCancel => "IN_CANCEL",
            Self::ToReturn => "TO_RETURN",
            Self::CancelledBeforeShip => "CANCELLED_BEFORE_SHIP",
            Self::Cancelled => "CANCELLED",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Higher is later in the lifecycle. Stored statuses never move to a lower priority through sync or webhooks.
    pub fn priority(&self) -> i32 {
        match self {
            Self::Unknown(_) => 0,
            Self::Unpaid => 1,
            Self::InvoicePending => 2,
            Self::ReadyToShip => 3,
            Self::Processed => 4,
            Self::Shipped => 5,
            Self::Completed => 6,
            Self::InCancel => 7,
            Self::ToReturn | Self::CancelledBeforeShip => 8,
            Self::Cancelled => 9,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::CancelledBeforeShip)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::CancelledBeforeShip | Self::InCancel)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// Status priority for a raw marketplace status string.
pub fn status_priority(status: &str) -> i32 {
    OrderStatus::from(status).priority()
}

impl From<&str> for OrderStatus {
    fn from(s: &str) -> Self {
        match s {
            "UNPAID" => Self::Unpaid,
            "INVOICE_PENDING" => Self::InvoicePending,
            "READY_TO_SHIP" => Self::ReadyToShip,
            "PROCESSED" => Self::Processed,
            "SHIPPED" => Self::Shipped,
            "COMPLETED" => Self::Completed,
            "IN_CANCEL" => Self::InCancel,
            "TO_RETURN" => Self::ToReturn,
            "CANCELLED_BEFORE_SHIP" => Self::CancelledBeforeShip,
            "CANCELLED" => Self::Cancelled,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Return states in which the marketplace has committed to refunding the buyer.
pub fn is_refund_confirmed(return_status: &str) -> bool {
    matches!(return_status, "ACCEPTED" | "REFUND_PAID")
}

//--------------------------------------  Integer status codes  ------------------------------------------------------
macro_rules! int_status {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $val:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $val),+
        }

        impl $name {
            pub fn code(&self) -> i32 {
                *self as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = ConversionError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($val => Ok(Self::$variant),)+
                    v => Err(ConversionError(format!("{v} is not a valid {}", stringify!($name)))),
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str(stringify!($variant)),)+
                }
            }
        }
    };
}

int_status!(
    /// Whether an order's cost has been reserved from the shop owner's prepayment.
    PrepaymentStatus { Unchecked = 0, Sufficient = 1, Insufficient = 2 }
);

int_status!(
    /// Internal handling of a return. Moves Unprocessed -> Processing -> {Processed, Failed, Skipped} and never back.
    RefundStatus { Unprocessed = 0, Processed = 1, Skipped = 2, Processing = 3, Failed = 4 }
);

int_status!(ShipmentStatus { Pending = 0, Shipped = 1, Completed = 2, Cancelled = 3, Failed = 4 });

int_status!(SettlementStatus { Pending = 0, Completed = 1, Cancelled = 2 });

int_status!(SettlementHandleStatus { Pending = 0, Completed = 1 });

int_status!(EscrowSyncStatus { Pending = 0, Success = 1, Failed = 2 });

int_status!(
    /// Sync records pause themselves after too many consecutive failures.
    SyncRecordStatus { Disabled = 0, Enabled = 1, Paused = 2 }
);

//--------------------------------------     Accounts        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Prepayment,
    Deposit,
    Operator,
    ShopOwnerCommission,
    PlatformCommission,
    PenaltyBonus,
    Escrow,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepayment => "prepayment",
            Self::Deposit => "deposit",
            Self::Operator => "operator",
            Self::ShopOwnerCommission => "shop_owner_commission",
            Self::PlatformCommission => "platform_commission",
            Self::PenaltyBonus => "penalty_bonus",
            Self::Escrow => "escrow",
        }
    }

    /// Three-letter prefix used in transaction numbers.
    pub fn tx_prefix(&self) -> &'static str {
        match self {
            Self::Prepayment => "PRE",
            Self::Deposit => "DEP",
            Self::Operator => "OPR",
            Self::ShopOwnerCommission => "SOC",
            Self::PlatformCommission => "PLT",
            Self::PenaltyBonus => "PNB",
            Self::Escrow => "ESC",
        }
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepayment" => Ok(Self::Prepayment),
            "deposit" => Ok(Self::Deposit),
            "operator" => Ok(Self::Operator),
            "shop_owner_commission" => Ok(Self::ShopOwnerCommission),
            "platform_commission" => Ok(Self::PlatformCommission),
            "penalty_bonus" => Ok(Self::PenaltyBonus),
            "escrow" => Ok(Self::Escrow),
            s => Err(ConversionError(format!("Invalid account type: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum AccountStatus {
    Normal,
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Recharge,
    Withdraw,
    Freeze,
    Unfreeze,
    /// Frozen prepayment consumed by a settled order.
    OrderPay,
    OrderRefund,
    ProfitShare,
    CostSettle,
    PlatformFee,
    DepositPay,
    DepositRefund,
    EscrowIn,
    EscrowOut,
    Penalty,
    Bonus,
    Adjustment,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: i64,
    pub admin_id: i64,
    pub account_type: AccountType,
    pub balance: Money,
    pub frozen_amount: Money,
    /// Lifetime credits: recharges for prepayment, earnings for operator and commission accounts.
    pub total_credited: Money,
    /// Lifetime debits: consumed prepayment, withdrawals.
    pub total_debited: Money,
    /// Deposit accounts only.
    pub required_amount: Money,
    pub status: AccountStatus,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn available(&self) -> Money {
        self.balance
    }
}

/// An append-only ledger row. `amount == balance_after - balance_before` always holds, so rows that only move
/// frozen funds carry a zero amount and record the movement in the frozen columns.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AccountTransaction {
    pub id: i64,
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
    pub created_at: DateTime<Utc>,
}

//--------------------------------------      Shops          ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Shop {
    pub id: i64,
    pub shop_id: i64,
    /// The shop owner.
    pub admin_id: i64,
    pub shop_name: String,
    pub region: String,
    pub currency: String,
    pub sync_orders: bool,
    pub sync_finance: bool,
    /// Unix seconds of the last successful order patrol.
    pub last_sync_at: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewShop {
    pub shop_id: i64,
    pub admin_id: i64,
    pub shop_name: String,
    pub region: String,
    pub currency: String,
}

impl NewShop {
    pub fn new(shop_id: i64, admin_id: i64) -> Self {
        Self { shop_id, admin_id, currency: balance_common::DEFAULT_CURRENCY.to_string(), ..Default::default() }
    }
}

#[derive(Clone, FromRow)]
pub struct ShopAuthorization {
    pub shop_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ShopAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ShopAuthorization(shop {}, access expires {}, refresh expires {})",
            self.shop_id, self.access_expires_at, self.refresh_expires_at
        )
    }
}

impl ShopAuthorization {
    pub fn access_expired(&self, now: i64) -> bool {
        self.access_expires_at <= now
    }

    pub fn refresh_expired(&self, now: i64) -> bool {
        self.refresh_expires_at <= now
    }
}

//--------------------------------------      Orders         ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: i64,
    pub shop_id: i64,
    pub order_sn: String,
    pub region: String,
    pub currency: String,
    pub cod: bool,
    pub total_amount: Money,
    pub order_status: String,
    pub status_locked: bool,
    pub status_remark: String,
    pub shipping_carrier: String,
    pub payment_method: String,
    pub tracking_number: String,
    pub buyer_user_id: i64,
    pub buyer_username: String,
    pub create_time: i64,
    pub update_time: i64,
    pub pay_time: i64,
    pub ship_by_date: i64,
    pub prepayment_amount: Money,
    pub prepayment_status: PrepaymentStatus,
    pub prepayment_snapshot: Money,
    pub prepayment_checked_at: Option<DateTime<Utc>>,
    /// Prepayment currently held for this order. Decreases on refunds and settlement.
    pub frozen_amount: Money,
    pub escrow_amount: Money,
    pub commission_fee: Money,
    pub service_fee: Money,
    pub seller_transaction_fee: Money,
    pub buyer_paid_shipping_fee: Money,
    pub actual_shipping_fee: Money,
    pub credit_card_transaction_fee: Money,
    pub fee_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn status(&self) -> OrderStatus {
        OrderStatus::from(self.order_status.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct OrderItem {
    pub id: i64,
    pub shop_id: i64,
    pub order_sn: String,
    pub item_id: i64,
    pub item_name: String,
    pub item_sku: String,
    pub model_id: i64,
    pub model_name: String,
    pub model_sku: String,
    pub quantity: i64,
    pub item_price: Money,
    pub prepayment_share: Money,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewOrderItem {
    pub item_id: i64,
    pub item_name: String,
    pub item_sku: String,
    pub model_id: i64,
    pub model_name: String,
    pub model_sku: String,
    pub quantity: i64,
    pub item_price: Money,
    pub prepayment_share: Money,
}

#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize)]
pub struct OrderAddress {
    pub name: String,
    pub phone: String,
    pub town: String,
    pub district: String,
    pub city: String,
    pub state: String,
    pub region: String,
    pub zipcode: String,
    pub full_address: String,
}

/// Package-level logistics state for an order.
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize)]
pub struct Shipment {
    pub shop_id: i64,
    pub order_sn: String,
    pub package_number: String,
    pub tracking_number: String,
    pub shipping_carrier: String,
    pub logistics_status: String,
}

/// Everything the marketplace says about an order, normalised to cents. This is what an upsert writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSnapshot {
    pub shop_id: i64,
    pub order_sn: String,
    pub region: String,
    pub currency: String,
    pub cod: bool,
    pub total_amount: Money,
    pub order_status: String,
    pub shipping_carrier: String,
    pub payment_method: String,
    pub tracking_number: String,
    pub buyer_user_id: i64,
    pub buyer_username: String,
    pub create_time: i64,
    pub update_time: i64,
    pub pay_time: i64,
    pub ship_by_date: i64,
    pub items: Vec<NewOrderItem>,
    pub address: OrderAddress,
    pub packages: Vec<Shipment>,
}

/// Fee breakdown captured from the escrow-detail endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeBreakdown {
    pub escrow_amount: Money,
    pub buyer_total_amount: Money,
    pub original_price: Money,
    pub commission_fee: Money,
    pub service_fee: Money,
    pub seller_transaction_fee: Money,
    pub buyer_paid_shipping_fee: Money,
    pub final_shipping_fee: Money,
    pub actual_shipping_fee: Money,
    pub credit_card_transaction_fee: Money,
    pub original_cost_of_goods_sold: Money,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrderEscrow {
    pub id: i64,
    pub shop_id: i64,
    pub order_sn: String,
    pub escrow_amount: Money,
    pub buyer_total_amount: Money,
    pub original_price: Money,
    pub commission_fee: Money,
    pub service_fee: Money,
    pub seller_transaction_fee: Money,
    pub final_shipping_fee: Money,
    pub actual_shipping_fee: Money,
    pub original_cost_of_goods_sold: Money,
    pub sync_status: EscrowSyncStatus,
    pub sync_error: String,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      Returns        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReturnRecord {
    pub id: i64,
    pub shop_id: i64,
    pub return_sn: String,
    pub order_sn: String,
    pub refund_amount: Money,
    pub amount_before_discount: Money,
    pub currency: String,
    pub status: String,
    pub reason: String,
    pub text_reason: String,
    pub buyer_username: String,
    pub tracking_number: String,
    pub needs_logistics: bool,
    pub logistics_status: String,
    pub due_date: i64,
    pub create_time: i64,
    pub update_time: i64,
    pub refund_status: RefundStatus,
    pub refund_error: String,
    pub unfrozen_amount: Money,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnSnapshot {
    pub shop_id: i64,
    pub return_sn: String,
    pub order_sn: String,
    pub refund_amount: Money,
    pub amount_before_discount: Money,
    pub currency: String,
    pub status: String,
    pub reason: String,
    pub text_reason: String,
    pub buyer_username: String,
    pub tracking_number: String,
    pub needs_logistics: bool,
    pub logistics_status: String,
    pub due_date: i64,
    pub create_time: i64,
    pub update_time: i64,
}

//--------------------------------------  Shipment & settle  ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrderShipmentRecord {
    pub id: i64,
    pub shop_id: i64,
    pub order_sn: String,
    pub operator_id: i64,
    pub shop_owner_id: i64,
    pub goods_cost: Money,
    pub shipping_cost: Money,
    pub total_cost: Money,
    pub frozen_amount: Money,
    /// Ledger row of the escrow transfer made when the order shipped.
    pub freeze_transaction_no: String,
    pub ship_method: String,
    pub status: ShipmentStatus,
    pub settlement_id: Option<i64>,
    pub failure_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitShareRates {
    pub platform: Rate,
    pub operator: Rate,
    pub shop_owner: Rate,
}

impl Default for ProfitShareRates {
    /// 5% platform, 45% operator, 50% shop owner.
    fn default() -> Self {
        Self { platform: Rate::from_bps(500), operator: Rate::from_bps(4500), shop_owner: Rate::from_bps(5000) }
    }
}

impl ProfitShareRates {
    pub fn new(platform: Rate, operator: Rate, shop_owner: Rate) -> Self {
        Self { platform, operator, shop_owner }
    }

    pub fn is_valid(&self) -> bool {
        [self.platform, self.operator, self.shop_owner].iter().all(Rate::is_valid)
            && self.platform.bps() + self.operator.bps() + self.shop_owner.bps()
                == Rate::ONE_HUNDRED_PERCENT.bps()
    }
}

/// The result of splitting an order's profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfitSplit {
    pub profit: Money,
    pub platform_share: Money,
    pub operator_share: Money,
    pub shop_owner_share: Money,
    pub operator_income: Money,
}

impl ProfitSplit {
    /// Splits `escrow_amount - total_cost`. The shop owner absorbs the rounding residual so the three shares always
    /// add up to the profit exactly.
    pub fn compute(escrow_amount: Money, total_cost: Money, rates: &ProfitShareRates) -> Self {
        let profit = escrow_amount - total_cost;
        let platform_share = profit.share(rates.platform);
        let operator_share = profit.share(rates.operator);
        let shop_owner_share = profit - platform_share - operator_share;
        Self { profit, platform_share, operator_share, shop_owner_share, operator_income: total_cost + operator_share }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProfitShareConfig {
    pub id: i64,
    pub shop_id: i64,
    pub operator_id: i64,
    pub platform_rate: Rate,
    pub operator_rate: Rate,
    pub shop_owner_rate: Rate,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ProfitShareConfig {
    pub fn rates(&self) -> ProfitShareRates {
        ProfitShareRates::new(self.platform_rate, self.operator_rate, self.shop_owner_rate)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrderSettlement {
    pub id: i64,
    pub shop_id: i64,
    pub order_sn: String,
    pub operator_id: i64,
    pub shop_owner_id: i64,
    pub escrow_amount: Money,
    pub total_cost: Money,
    pub profit: Money,
    pub platform_rate: Rate,
    pub operator_rate: Rate,
    pub shop_owner_rate: Rate,
    pub platform_share: Money,
    pub operator_share: Money,
    pub shop_owner_share: Money,
    pub operator_income: Money,
    pub adjustment_count: i64,
    pub adjustment_total: Money,
    pub status: SettlementStatus,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OrderSettlement {
    pub fn rates(&self) -> ProfitShareRates {
        ProfitShareRates::new(self.platform_rate, self.operator_rate, self.shop_owner_rate)
    }
}

//--------------------------------------      Finance        ---------------------------------------------------------
pub const ESCROW_VERIFIED_ADD: &str = "ESCROW_VERIFIED_ADD";
pub const ESCROW_ADJUSTMENT: &str = "ESCROW_ADJUSTMENT";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FinanceIncome {
    pub id: i64,
    pub shop_id: i64,
    pub transaction_id: i64,
    pub order_sn: String,
    pub refund_sn: String,
    pub transaction_type: String,
    pub status: String,
    pub wallet_type: String,
    pub amount: Money,
    pub current_balance: Money,
    pub transaction_fee: Money,
    pub description: String,
    pub buyer_name: String,
    pub reason: String,
    pub money_flow: String,
    pub create_time: i64,
    pub settlement_handle_status: SettlementHandleStatus,
    pub settlement_handled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewFinanceIncome {
    pub shop_id: i64,
    pub transaction_id: i64,
    pub order_sn: String,
    pub refund_sn: String,
    pub transaction_type: String,
    pub status: String,
    pub wallet_type: String,
    pub amount: Money,
    pub current_balance: Money,
    pub transaction_fee: Money,
    pub description: String,
    pub buyer_name: String,
    pub reason: String,
    pub money_flow: String,
    pub create_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
pub enum SyncType {
    FinanceIncome,
    Order,
    Escrow,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ShopSyncRecord {
    pub id: i64,
    pub shop_id: i64,
    pub sync_type: SyncType,
    pub last_sync_time: i64,
    pub last_transaction_id: i64,
    pub consecutive_fail_count: i64,
    pub last_error: String,
    pub status: SyncRecordStatus,
    pub total_synced: i64,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------  Notifications/logs  --------------------------------------------------------
pub const NOTIFICATION_PREPAYMENT_LOW: &str = "prepayment_low";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: i64,
    pub admin_id: i64,
    pub shop_id: i64,
    pub notification_type: String,
    pub title: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OperationLog {
    pub id: i64,
    pub shop_id: i64,
    pub order_sn: String,
    pub operator_id: i64,
    pub action: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewOperationLog {
    pub shop_id: i64,
    pub order_sn: String,
    pub operator_id: i64,
    pub action: String,
    pub detail: String,
}

impl NewOperationLog {
    pub fn new(shop_id: i64, order_sn: &str, action: &str, detail: impl Into<String>) -> Self {
        Self {
            shop_id,
            order_sn: order_sn.to_string(),
            operator_id: 0,
            action: action.to_string(),
            detail: detail.into(),
        }
    }

    pub fn by(mut self, operator_id: i64) -> Self {
        self.operator_id = operator_id;
        self
    }
}

//--------------------------------------   Daily statistics  ---------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize)]
pub struct OrderDailyStat {
    pub shop_id: i64,
    pub stat_date: String,
    pub order_count: i64,
    pub total_amount: Money,
    pub completed_count: i64,
    pub cancelled_count: i64,
    pub in_flight_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize)]
pub struct FinanceDailyStat {
    pub shop_id: i64,
    pub stat_date: String,
    pub escrow_income: Money,
    pub adjustment_amount: Money,
    pub settled_profit: Money,
    pub platform_share: Money,
    pub operator_share: Money,
    pub shop_owner_share: Money,
    pub settlement_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize)]
pub struct PlatformDailyStat {
    pub stat_date: String,
    pub order_count: i64,
    pub total_amount: Money,
    pub escrow_income: Money,
    pub settled_profit: Money,
    pub platform_share: Money,
    pub operator_share: Money,
    pub shop_owner_share: Money,
    pub active_shops: i64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_priorities_are_monotone_through_the_happy_path() {
        let path = ["UNPAID", "READY_TO_SHIP", "PROCESSED", "SHIPPED", "COMPLETED"];
        let priorities = path.iter().map(|s| status_priority(s)).collect::<Vec<_>>();
        assert!(priorities.windows(2).all(|w| w[0] < w[1]));
        assert!(status_priority("CANCELLED") > status_priority("COMPLETED"));
        assert!(status_priority("IN_CANCEL") > status_priority("SHIPPED"));
        assert_eq!(status_priority("SOMETHING_NEW"), 0);
        assert_eq!(OrderStatus::from("SOMETHING_NEW").to_string(), "SOMETHING_NEW");
    }

    #[test]
    fn int_codes() {
        assert_eq!(RefundStatus::Processing.code(), 3);
        assert_eq!(RefundStatus::try_from(4).unwrap(), RefundStatus::Failed);
        assert!(SyncRecordStatus::try_from(9).is_err());
        assert_eq!(ShipmentStatus::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn escrow_split_default_rates() {
        let split = ProfitSplit::compute(Money::from(28_000), Money::from(20_000), &ProfitShareRates::default());
        assert_eq!(split.profit, Money::from(8_000));
        assert_eq!(split.platform_share, Money::from(400));
        assert_eq!(split.operator_share, Money::from(3_600));
        assert_eq!(split.shop_owner_share, Money::from(4_000));
        assert_eq!(split.operator_income, Money::from(23_600));
    }

    #[test]
    fn escrow_split_always_sums_to_profit() {
        let rates = [
            ProfitShareRates::default(),
            ProfitShareRates::new(Rate::from_bps(333), Rate::from_bps(3333), Rate::from_bps(6334)),
            ProfitShareRates::new(Rate::from_bps(0), Rate::from_bps(10_000), Rate::from_bps(0)),
            ProfitShareRates::new(Rate::from_bps(1), Rate::from_bps(1), Rate::from_bps(9998)),
        ];
        for r in &rates {
            assert!(r.is_valid());
            for escrow in [0i64, 1, 7, 99, 12_345, 100_001, -5_55] {
                for cost in [0i64, 3, 5_000, 99_999] {
                    let split = ProfitSplit::compute(Money::from(escrow), Money::from(cost), r);
                    assert_eq!(split.platform_share + split.operator_share + split.shop_owner_share, split.profit);
                    assert_eq!(split.operator_income, Money::from(cost) + split.operator_share);
                }
            }
        }
        assert!(!ProfitShareRates::new(Rate::from_bps(500), Rate::from_bps(500), Rate::from_bps(500)).is_valid());
    }
}
